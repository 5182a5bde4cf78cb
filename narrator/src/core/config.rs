use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use crate::core::error::GenerationError;

pub const DEFAULT_CONFIG_PATH: &str = "narrator.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    /// Any OpenAI-compatible `/chat/completions` endpoint (LM Studio, Ollama, vLLM...).
    OpenAi,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            api_url: "https://api.anthropic.com/v1".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
        }
    }
}

impl LlmConfig {
    /// The key from the file, overridden by `ANTHROPIC_API_KEY` / `LLM_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String, GenerationError> {
        let env_key = match self.provider {
            LlmProvider::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            LlmProvider::OpenAi => None,
        }
        .or_else(|| std::env::var("LLM_API_KEY").ok());

        let key = env_key.or_else(|| self.api_key.clone()).unwrap_or_default();
        if key.trim().is_empty() && self.provider == LlmProvider::Anthropic {
            return Err(GenerationError::Configuration(
                "Anthropic API key not configured (set ANTHROPIC_API_KEY or llm.api_key)".to_string(),
            ));
        }
        Ok(key)
    }
}

/// Token budget and sampling temperature for one class of generation call.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CallSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub target_words: usize,
    pub chunk_word_targets: Vec<usize>,
    pub overflow_chunk_cap: usize,
    pub max_paragraph_words: usize,
    pub max_chunks: usize,
    pub trailing_sentences: usize,
    pub run_timeout_secs: u64,
    pub topic_count: usize,
    pub trace_dir: Option<PathBuf>,
    pub outline: CallSettings,
    pub content: CallSettings,
    pub utility: CallSettings,
    pub topics: CallSettings,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            target_words: 7500, // ~45 minutes at 150 wpm
            chunk_word_targets: vec![2500, 2500, 2500],
            overflow_chunk_cap: 2500,
            max_paragraph_words: 150,
            max_chunks: 20,
            trailing_sentences: 3,
            run_timeout_secs: 300,
            topic_count: 20,
            trace_dir: None,
            outline: CallSettings { max_tokens: 1000, temperature: 0.7 },
            content: CallSettings { max_tokens: 4000, temperature: 0.7 },
            utility: CallSettings { max_tokens: 600, temperature: 0.3 },
            topics: CallSettings { max_tokens: 1000, temperature: 0.8 },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub public_base_url: String,
    pub signing_secret: Option<String>,
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./media"),
            public_base_url: "http://localhost:8899/media".to_string(),
            signing_secret: None,
            signed_url_ttl_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Externally visible origin used in signed upload URLs. Defaults to `http://localhost:{port}`.
    pub base_url: Option<String>,
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8899, base_url: None, static_dir: None }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Loads `NARRATOR_CONFIG` (or `narrator.toml`), falling back to defaults when the file is absent.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var("NARRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
    };

    if !path.exists() {
        log::info!("Config {} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    load_config(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[llm]
provider = "openai"
api_url = "http://localhost:1234/v1"
model = "llama3"

[generation]
target_words = 3000
"#,
        )
        .unwrap();

        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.generation.target_words, 3000);
        assert_eq!(config.generation.chunk_word_targets, vec![2500, 2500, 2500]);
        assert_eq!(config.generation.max_paragraph_words, 150);
        assert_eq!(config.storage.signed_url_ttl_secs, 900);
        assert_eq!(config.server.port, 8899);
    }

    #[test]
    fn call_class_overrides() {
        let config: Config = toml::from_str(
            r#"
[generation.content]
max_tokens = 8000
temperature = 0.9
"#,
        )
        .unwrap();

        assert_eq!(config.generation.content.max_tokens, 8000);
        assert_eq!(config.generation.outline, GenerationConfig::default().outline);
    }

    #[test]
    fn openai_provider_allows_missing_key() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_key: None,
            ..LlmConfig::default()
        };
        // LLM_API_KEY may be set in the environment; either way this must not fail.
        assert!(config.resolve_api_key().is_ok());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narrator.toml");
        std::fs::write(&path, "[server]\nport = 9000\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9000);

        let missing = load_config_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(missing.server.port, 8899);
    }
}
