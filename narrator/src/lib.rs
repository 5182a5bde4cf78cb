//! Long-form "boring lecture" generation for sleep audio.
//!
//! A lecture is produced by chaining bounded generation calls: an outline,
//! one chunk per outlined section, then overflow chunks until the word target
//! is met. Each chunk is cleaned for speech synthesis and handed a rolling
//! summary of what came before.

pub mod core;

pub use crate::core::config::{load_config, load_config_or_default, Config};
pub use crate::core::error::GenerationError;
pub use crate::core::llm::{CallClass, Completion, LlmCallError, LlmClient, TextGenerator};
pub use crate::core::pipeline::{Chunk, GenerationRequest, GenerationResult, LecturePipeline, StoryResponse};
pub use crate::core::retry::RetryingGenerator;

use std::sync::Arc;

/// Builds the production generator from config: HTTP client wrapped in retries.
pub fn build_generator(config: &Config) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    let client = LlmClient::new(config.llm.clone())?;
    Ok(Arc::new(RetryingGenerator::from_config(client, &config.llm)))
}
