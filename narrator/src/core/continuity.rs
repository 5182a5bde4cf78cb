use anyhow::Result;

use crate::core::config::GenerationConfig;
use crate::core::llm::{CallClass, Completion, TextGenerator};
use crate::core::postprocess::{is_terminated, split_sentences};
use crate::core::trace::RunTrace;

const USED_MARKER: &str = "USED:";
const FALLBACK_TAIL_CHARS: usize = 300;

/// Context carried from one chunk to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinuityState {
    pub previous_summary: String,
    /// Proper nouns and dates already introduced. Only ever grows.
    pub used_elements: Vec<String>,
    pub previous_last_sentences: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSummary {
    pub summary: String,
    pub new_used_elements: Vec<String>,
}

impl ContinuityState {
    pub fn is_empty(&self) -> bool {
        self.previous_summary.is_empty()
            && self.used_elements.is_empty()
            && self.previous_last_sentences.is_empty()
    }

    /// State after `chunk_text`: its summary replaces the previous one, its
    /// elements are merged in and its closing sentences become the hand-off.
    pub fn advance(mut self, chunk_text: &str, summary: ChunkSummary, trailing: usize) -> Self {
        for element in summary.new_used_elements {
            let seen = self
                .used_elements
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&element));
            if !seen {
                self.used_elements.push(element);
            }
        }
        self.previous_summary = summary.summary;
        self.previous_last_sentences = last_sentences(chunk_text, trailing);
        self
    }
}

/// Everything before `USED:` is the summary, the comma list after it the
/// elements. Without the marker the whole response is the summary.
pub fn parse_summary(response: &str) -> ChunkSummary {
    match response.find(USED_MARKER) {
        Some(idx) => ChunkSummary {
            summary: response[..idx].trim().to_string(),
            new_used_elements: response[idx + USED_MARKER.len()..]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        },
        None => {
            log::warn!("Continuity summary has no {} line; keeping elements unchanged", USED_MARKER);
            ChunkSummary {
                summary: response.trim().to_string(),
                new_used_elements: Vec::new(),
            }
        }
    }
}

/// The last `n` terminated sentences of `text`, or its final ~300 characters
/// when fewer than `n` are found.
pub fn last_sentences(text: &str, n: usize) -> String {
    let sentences: Vec<&str> = split_sentences(text)
        .into_iter()
        .filter(|s| is_terminated(s))
        .collect();

    if n == 0 || sentences.len() < n {
        let tail: String = text.chars().rev().take(FALLBACK_TAIL_CHARS).collect::<Vec<_>>().into_iter().rev().collect();
        return tail.trim().to_string();
    }

    sentences[sentences.len() - n..]
        .iter()
        .map(|s| s.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn summary_prompt(chunk_text: &str) -> String {
    format!(
        "Summarize the following section of a bedtime history lecture so that the next section can continue it seamlessly.\n\n\
        Write exactly 3 sentences:\n\
        1. The topic and narrative arc this section covered.\n\
        2. The key proper nouns and dates it introduced.\n\
        3. Exactly where the narrative left off.\n\n\
        Then, on a new line, write USED: followed by a comma-separated list of every proper noun, named person and date mentioned in the section.\n\n\
        SECTION:\n{}",
        chunk_text
    )
}

pub struct ContinuityTracker<'a> {
    llm: &'a dyn TextGenerator,
    config: &'a GenerationConfig,
}

impl<'a> ContinuityTracker<'a> {
    pub fn new(llm: &'a dyn TextGenerator, config: &'a GenerationConfig) -> Self {
        Self { llm, config }
    }

    pub async fn summarize(&self, chunk_text: &str, trace: &mut RunTrace) -> Result<ChunkSummary> {
        let request = Completion::new(
            CallClass::Utility,
            CallClass::Utility.settings(self.config),
            summary_prompt(chunk_text),
        );
        let response = trace
            .record_call(self.llm, "Continuity Summary", "Summarizing previous chunk", &request)
            .await?;
        Ok(parse_summary(&response))
    }

    pub async fn refresh(
        &self,
        state: ContinuityState,
        chunk_text: &str,
        trace: &mut RunTrace,
    ) -> Result<ContinuityState> {
        let summary = self.summarize(chunk_text, trace).await?;
        let next = state.advance(chunk_text, summary, self.config.trailing_sentences);
        trace.log(
            "Continuity",
            &format!("{} used elements tracked", next.used_elements.len()),
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_used_line() {
        let parsed = parse_summary(
            "We covered the morning bake.\nA baker named Terentius appeared in 79.\nWe stopped at the oven.\nUSED: Rome, fourteen twenty-three, , Pompeii ",
        );
        assert_eq!(
            parsed.summary,
            "We covered the morning bake.\nA baker named Terentius appeared in 79.\nWe stopped at the oven."
        );
        assert_eq!(parsed.new_used_elements, vec!["Rome", "fourteen twenty-three", "Pompeii"]);
    }

    #[test]
    fn missing_marker_degrades_to_summary_only() {
        let parsed = parse_summary("  Just a summary.  ");
        assert_eq!(parsed.summary, "Just a summary.");
        assert!(parsed.new_used_elements.is_empty());
    }

    #[test]
    fn used_elements_grow_monotonically() {
        let first = ContinuityState::default().advance(
            "One. Two. Three.",
            parse_summary("First.\nUSED: Rome, fourteen twenty-three"),
            3,
        );
        assert_eq!(first.used_elements.len(), 2);

        let second = first.clone().advance(
            "Four. Five. Six.",
            parse_summary("Second.\nUSED: a baker named Terentius, rome"),
            3,
        );
        assert_eq!(second.used_elements.len(), 3);
        assert!(first.used_elements.iter().all(|e| second.used_elements.contains(e)));
        assert_eq!(second.previous_summary, "Second.");
        assert_eq!(second.previous_last_sentences, "Four. Five. Six.");
    }

    #[test]
    fn last_sentences_takes_terminated_tail() {
        let text = "Alpha. Beta? Gamma. Delta. and a dangling fragment";
        assert_eq!(last_sentences(text, 3), "Beta? Gamma. Delta.");
    }

    #[test]
    fn last_sentences_falls_back_to_character_tail() {
        let short = "Only one sentence here.";
        assert_eq!(last_sentences(short, 3), short);

        let long = format!("{} end.", "x".repeat(500));
        let tail = last_sentences(&long, 3);
        assert_eq!(tail.chars().count(), 300);
        assert!(tail.ends_with(" end."));
    }
}
