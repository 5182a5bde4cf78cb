use anyhow::Result;

use crate::core::config::GenerationConfig;
use crate::core::llm::{CallClass, Completion, TextGenerator};

pub const TOPIC_CATEGORIES: [&str; 5] = [
    "trades and crafts",
    "infrastructure",
    "slow processes",
    "forgotten institutions",
    "everyday domestic life",
];

pub fn topics_prompt(count: usize) -> String {
    let per_category = count.div_ceil(TOPIC_CATEGORIES.len()).max(1);
    format!(
        "Generate {count} boring history lecture topics that would make good sleep content. Each topic should be about what specific people did during their ordinary days.\n\n\
        Spread the topics across these categories, roughly {per_category} each: {}.\n\n\
        Examples of the style:\n\
        - Daily routines of a Roman bath house attendant\n\
        - Maintaining a lighthouse in the 1800s\n\
        - Keeping bees in ancient Crete\n\
        - Mending nets in a Norse fishing village\n\n\
        Rules:\n\
        - Cover at least 8 different civilizations or eras.\n\
        - Never repeat an occupation or institution.\n\
        - Provide exactly {count} topics, one per line, with no numbering, bullets or category headings.",
        TOPIC_CATEGORIES.join(", ")
    )
}

/// Non-empty trimmed lines, at most `count`.
pub fn parse_topics(response: &str, count: usize) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(count)
        .map(str::to_string)
        .collect()
}

pub struct TopicProposer<'a> {
    llm: &'a dyn TextGenerator,
    config: &'a GenerationConfig,
}

impl<'a> TopicProposer<'a> {
    pub fn new(llm: &'a dyn TextGenerator, config: &'a GenerationConfig) -> Self {
        Self { llm, config }
    }

    pub async fn propose(&self, count: usize) -> Result<Vec<String>> {
        let request = Completion::new(
            CallClass::Topics,
            CallClass::Topics.settings(self.config),
            topics_prompt(count),
        );
        let response = self.llm.complete(&request).await?;
        let topics = parse_topics(&response, count);
        log::info!("Proposed {} topics", topics.len());
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_truncates() {
        let topics = parse_topics("  Salt panning in Ostia \n\n Night watch in Edo\nTending geese\n", 2);
        assert_eq!(topics, vec!["Salt panning in Ostia", "Night watch in Edo"]);
    }

    #[test]
    fn prompt_names_every_category() {
        let prompt = topics_prompt(20);
        for category in TOPIC_CATEGORIES {
            assert!(prompt.contains(category));
        }
        assert!(prompt.contains("exactly 20 topics"));
        assert!(prompt.contains("roughly 4 each"));
    }
}
