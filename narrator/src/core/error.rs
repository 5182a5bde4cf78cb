use thiserror::Error;

/// Fatal outcomes of a generation run. Parse degradations never surface here.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("text generation failed: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error(
        "generation did not converge: {total_words} of {target_words} words after {attempts} content calls"
    )]
    DidNotConverge {
        attempts: usize,
        total_words: usize,
        target_words: usize,
    },

    #[error("generation timed out after {0}s")]
    Timeout(u64),
}

impl GenerationError {
    /// Short, stable label used as the `error` field of API error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "Invalid request",
            GenerationError::Configuration(_) => "Service not configured",
            GenerationError::Upstream(_) => "Failed to generate story",
            GenerationError::DidNotConverge { .. } => "Generation did not converge",
            GenerationError::Timeout(_) => "Generation timed out",
        }
    }
}
