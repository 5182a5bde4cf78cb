use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::GenerationConfig;
use crate::core::continuity::{ContinuityState, ContinuityTracker};
use crate::core::error::GenerationError;
use crate::core::llm::{CallClass, Completion, TextGenerator};
use crate::core::outline::OutlinePlanner;
use crate::core::postprocess::{post_process, word_count};
use crate::core::prompts::{overflow_prompt, section_prompt, LECTURE_SYSTEM_PROMPT};
use crate::core::topics::TopicProposer;
use crate::core::trace::RunTrace;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub generate_full: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub content: String,
    pub word_count: usize,
    pub part_number: usize,
    pub focus_area: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub parts: Vec<Chunk>,
    pub total_words: usize,
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StoryResponse {
    #[serde(rename_all = "camelCase")]
    FocusAreas { focus_areas: Vec<String> },
    Full(GenerationResult),
}

/// The lecture as built so far. Each accepted chunk produces a new draft.
#[derive(Debug, Clone, Default)]
struct Draft {
    parts: Vec<Chunk>,
    total_words: usize,
    focus_areas: Vec<String>,
}

impl Draft {
    fn new(section_titles: &[String]) -> Self {
        Self {
            focus_areas: section_titles.to_vec(),
            ..Self::default()
        }
    }

    fn with_chunk(mut self, content: String, focus_area: String) -> Self {
        let words = word_count(&content);
        self.parts.push(Chunk {
            content,
            word_count: words,
            part_number: self.parts.len() + 1,
            focus_area,
        });
        self.total_words += words;
        self
    }

    fn with_overflow_chunk(mut self, content: String, label: String) -> Self {
        self.focus_areas.push(label.clone());
        self.with_chunk(content, label)
    }

    fn record_last(&self, trace: &mut RunTrace) {
        if let Some(part) = self.parts.last() {
            trace.record_part(part.part_number, &part.focus_area, part.word_count, self.total_words);
        }
    }

    fn finish(self) -> GenerationResult {
        GenerationResult {
            parts: self.parts,
            total_words: self.total_words,
            focus_areas: self.focus_areas,
        }
    }
}

fn validate_topic(topic: &str) -> Result<&str, GenerationError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(GenerationError::Validation("Topic is required".to_string()));
    }
    Ok(topic)
}

/// Drives outline -> planned chunks -> overflow chunks for one topic.
pub struct LecturePipeline {
    llm: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl LecturePipeline {
    pub fn new(llm: Arc<dyn TextGenerator>, config: GenerationConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Request entry point: validates, dispatches on `generate_full` and
    /// bounds the whole run by `run_timeout_secs`.
    pub async fn handle(&self, request: &GenerationRequest) -> Result<StoryResponse, GenerationError> {
        let topic = validate_topic(&request.topic)?;
        let limit = self.config.run_timeout_secs;

        let run = async {
            if request.generate_full {
                self.generate(topic).await.map(StoryResponse::Full)
            } else {
                self.focus_areas(topic)
                    .await
                    .map(|focus_areas| StoryResponse::FocusAreas { focus_areas })
            }
        };

        match tokio::time::timeout(Duration::from_secs(limit), run).await {
            Ok(result) => result,
            Err(_) => {
                log::error!("Generation for '{}' exceeded {}s; aborting", topic, limit);
                Err(GenerationError::Timeout(limit))
            }
        }
    }

    pub async fn focus_areas(&self, topic: &str) -> Result<Vec<String>, GenerationError> {
        let topic = validate_topic(topic)?;
        let mut trace = RunTrace::new(topic);
        let outline = OutlinePlanner::new(self.llm.as_ref(), &self.config)
            .plan(topic, &mut trace)
            .await;
        trace.persist(self.config.trace_dir.as_deref());
        Ok(outline?.section_titles)
    }

    pub async fn generate(&self, topic: &str) -> Result<GenerationResult, GenerationError> {
        let targets = self.config.chunk_word_targets.clone();
        self.generate_with(topic, self.config.target_words, &targets).await
    }

    pub async fn generate_with(
        &self,
        topic: &str,
        target_words: usize,
        chunk_word_targets: &[usize],
    ) -> Result<GenerationResult, GenerationError> {
        let topic = validate_topic(topic)?;
        let mut trace = RunTrace::new(topic).with_target(target_words);
        trace.log(
            "Start",
            &format!("Target {} words, planned chunks {:?}", target_words, chunk_word_targets),
        );

        let result = self.run(topic, target_words, chunk_word_targets, &mut trace).await;
        match &result {
            Ok(done) => trace.log(
                "Complete",
                &format!("{} parts, {} words", done.parts.len(), done.total_words),
            ),
            Err(e) => trace.log("Failed", &e.to_string()),
        }
        trace.persist(self.config.trace_dir.as_deref());
        result
    }

    async fn run(
        &self,
        topic: &str,
        target_words: usize,
        chunk_word_targets: &[usize],
        trace: &mut RunTrace,
    ) -> Result<GenerationResult, GenerationError> {
        let llm = self.llm.as_ref();
        let tracker = ContinuityTracker::new(llm, &self.config);

        let outline = OutlinePlanner::new(llm, &self.config).plan(topic, trace).await?;
        let mut draft = Draft::new(&outline.section_titles);
        let mut state = ContinuityState::default();
        let mut attempts = 0;

        let planned = chunk_word_targets.len();
        for (i, &chunk_target) in chunk_word_targets.iter().enumerate() {
            self.check_budget(attempts, &draft, target_words)?;
            attempts += 1;

            let focus_area = outline
                .section_titles
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("{}, continued (part {})", topic, i + 1));
            let continuity = (i > 0 && !state.is_empty()).then_some(&state);
            let prompt = section_prompt(topic, &outline.text, i + 1, &focus_area, chunk_target, continuity);

            let details = format!("Section {} of {} ({}), target {} words", i + 1, planned, focus_area, chunk_target);
            let Some(content) = self.write_chunk(prompt, &details, trace).await? else {
                continue;
            };

            draft = draft.with_chunk(content, focus_area);
            draft.record_last(trace);
            log::info!("Part {} done. Total words so far: {}/{}", draft.parts.len(), draft.total_words, target_words);

            let more_follows = i + 1 < planned || draft.total_words < target_words;
            if more_follows {
                state = self.refresh(&tracker, state, &draft, trace).await?;
            }
        }

        let mut overflow_count = 0;
        while draft.total_words < target_words {
            self.check_budget(attempts, &draft, target_words)?;
            attempts += 1;

            let remaining = target_words - draft.total_words;
            let chunk_target = remaining.min(self.config.overflow_chunk_cap);
            let prompt = overflow_prompt(topic, &outline.text, &draft.focus_areas, chunk_target, &state);

            let details = format!("Overflow chunk, {} words remaining, target {}", remaining, chunk_target);
            let Some(content) = self.write_chunk(prompt, &details, trace).await? else {
                continue;
            };

            overflow_count += 1;
            draft = draft.with_overflow_chunk(content, format!("Additional section {}", overflow_count));
            draft.record_last(trace);
            log::info!("Part {} done. Total words so far: {}/{}", draft.parts.len(), draft.total_words, target_words);

            if draft.total_words < target_words {
                state = self.refresh(&tracker, state, &draft, trace).await?;
            }
        }

        Ok(draft.finish())
    }

    fn check_budget(&self, attempts: usize, draft: &Draft, target_words: usize) -> Result<(), GenerationError> {
        if attempts >= self.config.max_chunks {
            log::error!(
                "Giving up after {} content calls with {}/{} words",
                attempts, draft.total_words, target_words
            );
            return Err(GenerationError::DidNotConverge {
                attempts,
                total_words: draft.total_words,
                target_words,
            });
        }
        Ok(())
    }

    /// One content call plus cleanup. `None` when nothing usable came back.
    async fn write_chunk(
        &self,
        prompt: String,
        details: &str,
        trace: &mut RunTrace,
    ) -> Result<Option<String>, GenerationError> {
        let request = Completion::new(CallClass::Content, self.config.content, prompt)
            .with_system(LECTURE_SYSTEM_PROMPT);
        let raw = trace.record_call(self.llm.as_ref(), "Chunk", details, &request).await?;

        let content = post_process(&raw, self.config.max_paragraph_words);
        if content.is_empty() {
            log::warn!("Generated chunk was empty after cleanup ({})", details);
            trace.log("Empty Chunk", details);
            return Ok(None);
        }
        Ok(Some(content))
    }

    async fn refresh(
        &self,
        tracker: &ContinuityTracker<'_>,
        state: ContinuityState,
        draft: &Draft,
        trace: &mut RunTrace,
    ) -> Result<ContinuityState, GenerationError> {
        let Some(last) = draft.parts.last() else {
            return Ok(state);
        };
        Ok(tracker.refresh(state, &last.content, trace).await?)
    }

    pub async fn propose_topics(&self, count: usize) -> Result<Vec<String>, GenerationError> {
        Ok(TopicProposer::new(self.llm.as_ref(), &self.config).propose(count).await?)
    }
}
