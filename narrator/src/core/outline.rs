use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use crate::core::config::GenerationConfig;
use crate::core::llm::{CallClass, Completion, TextGenerator};
use crate::core::trace::RunTrace;

pub const OUTLINE_SECTIONS: usize = 3;

// Unindented "1. Title", "2) Title", "## 3. Title", "**Section 1:** Title".
static TOP_LEVEL_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#+\s*)?(?:\*\*)?(?i:(?:section|part)\s+)?(\d+)[.):]\s*(?:\*\*)?\s+(\S.*)$").unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub text: String,
    /// Top-level section titles, or `[topic]` when none could be parsed.
    pub section_titles: Vec<String>,
}

pub fn outline_prompt(topic: &str) -> String {
    format!(
        "Create an outline for a long, sleep-inducing history lecture on \"{topic}\".\n\n\
        Requirements:\n\
        - Exactly {OUTLINE_SECTIONS} top-level sections, numbered \"1.\", \"2.\", \"3.\" at the start of the line with no indentation, each followed by its title.\n\
        - Each section has exactly 3 subsections, indented and lettered \"a.\", \"b.\", \"c.\".\n\
        - Each subsection lists 2-3 supporting details (routines, people, dates, small processes) as indented \"-\" bullets.\n\
        - Make the structure meandering rather than linear: let sections drift sideways into neighbouring trades, places and habits before returning to the topic.\n\n\
        Output only the outline."
    )
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// Titles of the top-level numbered sections, at most [`OUTLINE_SECTIONS`].
/// Falls back to `[topic]` when the outline has none.
pub fn parse_section_titles(outline: &str, topic: &str) -> Vec<String> {
    let titles: Vec<String> = outline
        .lines()
        .filter_map(|line| TOP_LEVEL_SECTION.captures(line.trim_end()))
        .filter_map(|caps| caps.get(2).map(|m| clean_title(m.as_str())))
        .filter(|title| !title.is_empty())
        .take(OUTLINE_SECTIONS)
        .collect();

    if titles.is_empty() {
        log::warn!("Outline for '{}' has no numbered sections; using the topic as the only section", topic);
        return vec![topic.to_string()];
    }
    titles
}

pub struct OutlinePlanner<'a> {
    llm: &'a dyn TextGenerator,
    config: &'a GenerationConfig,
}

impl<'a> OutlinePlanner<'a> {
    pub fn new(llm: &'a dyn TextGenerator, config: &'a GenerationConfig) -> Self {
        Self { llm, config }
    }

    pub async fn plan(&self, topic: &str, trace: &mut RunTrace) -> Result<Outline> {
        let request = Completion::new(
            CallClass::Outline,
            CallClass::Outline.settings(self.config),
            outline_prompt(topic),
        );
        let text = trace
            .record_call(self.llm, "Outline", &format!("Planning sections for '{}'", topic), &request)
            .await?;

        let section_titles = parse_section_titles(&text, topic);
        trace.log("Outline Parsed", &format!("Sections: {:?}", section_titles));

        Ok(Outline { text, section_titles })
    }
}
