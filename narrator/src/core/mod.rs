pub mod config;
pub mod continuity;
pub mod error;
pub mod llm;
pub mod outline;
pub mod pipeline;
pub mod postprocess;
pub mod prompts;
pub mod retry;
pub mod topics;
pub mod trace;
