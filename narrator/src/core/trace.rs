use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::llm::{Completion, TextGenerator};
use crate::core::postprocess::word_count;

#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceStep {
    pub timestamp: String,
    pub step_name: String,
    pub details: String,
    pub call: Option<CallRecord>,
}

/// What went over the wire for one generation call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallRecord {
    pub class: &'static str,
    pub prompt: String,
    pub response: String,
    pub response_words: usize,
    pub elapsed_ms: u128,
}

/// A chunk that made it into the lecture.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PartRecord {
    pub part_number: usize,
    pub focus_area: String,
    pub words: usize,
    pub running_total: usize,
}

/// Record of one generation run: every step, every LLM call, and the word
/// count of each accepted part. Written out as a Markdown report when a trace
/// directory is configured.
pub struct RunTrace {
    id: String,
    topic: String,
    target_words: Option<usize>,
    start_time: chrono::DateTime<chrono::Local>,
    steps: Vec<TraceStep>,
    parts: Vec<PartRecord>,
}

impl RunTrace {
    pub fn new(topic: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            target_words: None,
            start_time: chrono::Local::now(),
            steps: Vec::new(),
            parts: Vec::new(),
        }
    }

    pub fn with_target(mut self, target_words: usize) -> Self {
        self.target_words = Some(target_words);
        self
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn parts(&self) -> &[PartRecord] {
        &self.parts
    }

    fn push(&mut self, step_name: &str, details: &str, call: Option<CallRecord>) {
        self.steps.push(TraceStep {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            step_name: step_name.to_string(),
            details: details.to_string(),
            call,
        });
    }

    pub fn log(&mut self, step_name: &str, details: &str) {
        self.push(step_name, details, None);
        log::info!("[{}] {}: {}", self.short_id(), step_name, details);
    }

    /// Issues one generation call and records prompt, response and timing.
    pub async fn record_call(
        &mut self,
        llm: &dyn TextGenerator,
        step_name: &str,
        details: &str,
        request: &Completion,
    ) -> Result<String> {
        let started = Instant::now();
        let response = llm.complete(request).await?;
        let call = CallRecord {
            class: request.class.as_str(),
            prompt: request.prompt.clone(),
            response_words: word_count(&response),
            response: response.clone(),
            elapsed_ms: started.elapsed().as_millis(),
        };
        log::info!(
            "[{}] {} ({} call, {} words in {}ms): {}",
            self.short_id(),
            step_name,
            call.class,
            call.response_words,
            call.elapsed_ms,
            details
        );
        self.push(step_name, details, Some(call));
        Ok(response)
    }

    pub fn record_part(&mut self, part_number: usize, focus_area: &str, words: usize, running_total: usize) {
        self.parts.push(PartRecord {
            part_number,
            focus_area: focus_area.to_string(),
            words,
            running_total,
        });
    }

    fn short_id(&self) -> &str {
        &self.id[..8]
    }

    fn slug(&self) -> String {
        let slug: String = self
            .topic
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .take(40)
            .collect();
        slug.trim_matches('_').to_string()
    }

    fn calls_by_class(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for call in self.steps.iter().filter_map(|s| s.call.as_ref()) {
            *counts.entry(call.class).or_insert(0) += 1;
        }
        counts
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let written = self.parts.last().map_or(0, |p| p.running_total);

        let _ = writeln!(out, "# Lecture trace: {}\n", self.topic);
        let _ = writeln!(out, "- Run `{}`, started {}", self.id, self.start_time.format("%Y-%m-%d %H:%M:%S"));
        match self.target_words {
            Some(target) => {
                let _ = writeln!(out, "- Words: {} of {} across {} parts", written, target, self.parts.len());
            }
            None => {
                let _ = writeln!(out, "- Words: {} across {} parts", written, self.parts.len());
            }
        }
        let calls = self.calls_by_class();
        let summary: Vec<String> = calls.iter().map(|(class, n)| format!("{} {}", class, n)).collect();
        let _ = writeln!(out, "- LLM calls: {}", if summary.is_empty() { "none".to_string() } else { summary.join(", ") });

        if !self.parts.is_empty() {
            let _ = writeln!(out, "\n## Parts\n");
            let _ = writeln!(out, "| part | focus area | words | total |");
            let _ = writeln!(out, "|------|------------|-------|-------|");
            for part in &self.parts {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    part.part_number,
                    part.focus_area.replace('|', "/"),
                    part.words,
                    part.running_total
                );
            }
        }

        let _ = writeln!(out, "\n## Timeline");
        for (i, step) in self.steps.iter().enumerate() {
            match &step.call {
                Some(call) => {
                    let _ = writeln!(
                        out,
                        "\n### {:02} {} `{}` [{} call, {} words, {}ms]\n",
                        i + 1,
                        step.timestamp,
                        step.step_name,
                        call.class,
                        call.response_words,
                        call.elapsed_ms
                    );
                    let _ = writeln!(out, "{}\n", step.details);
                    let _ = writeln!(out, "<details><summary>prompt</summary>\n\n```text\n{}\n```\n</details>\n", call.prompt);
                    let _ = writeln!(out, "```text\n{}\n```", call.response);
                }
                None => {
                    let _ = writeln!(out, "\n### {:02} {} `{}`\n", i + 1, step.timestamp, step.step_name);
                    let _ = writeln!(out, "{}", step.details);
                }
            }
        }
        out
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let filename = format!(
            "trace_{}_{}_{}.md",
            self.start_time.format("%Y%m%d_%H%M"),
            self.slug(),
            self.short_id()
        );
        let path = dir.join(filename);
        std::fs::write(&path, self.render())?;
        Ok(path)
    }

    /// Best-effort save; a trace that cannot be written never fails the run.
    pub fn persist(&self, dir: Option<&Path>) {
        let Some(dir) = dir else { return };
        match self.save(dir) {
            Ok(path) => log::info!("Trace saved to {}", path.display()),
            Err(e) => log::warn!("Failed to save trace: {}", e),
        }
    }
}
