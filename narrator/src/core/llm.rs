use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::core::config::{CallSettings, GenerationConfig, LlmConfig, LlmProvider};
use crate::core::error::GenerationError;

/// Transport failure of a provider call, classified for retries.
#[derive(Debug, thiserror::Error)]
pub enum LlmCallError {
    #[error("LLM Connection Failed: {0}")]
    Connection(String),
    #[error("LLM API Error {status}: {body}")]
    Status { status: u16, body: String },
}

impl LlmCallError {
    /// Connection failures, rate limits and server-side errors (529
    /// overloaded included) can succeed on a later attempt. Other 4xx cannot.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmCallError::Connection(_) => true,
            LlmCallError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Which kind of call is being made. Selects token budget and temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    Outline,
    Content,
    Utility,
    Topics,
}

impl CallClass {
    pub fn settings(self, config: &GenerationConfig) -> CallSettings {
        match self {
            CallClass::Outline => config.outline,
            CallClass::Content => config.content,
            CallClass::Utility => config.utility,
            CallClass::Topics => config.topics,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallClass::Outline => "outline",
            CallClass::Content => "content",
            CallClass::Utility => "utility",
            CallClass::Topics => "topics",
        }
    }
}

/// One request to the text-generation service.
#[derive(Debug, Clone)]
pub struct Completion {
    pub class: CallClass,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Completion {
    pub fn new(class: CallClass, settings: CallSettings, prompt: impl Into<String>) -> Self {
        Self {
            class,
            system: None,
            prompt: prompt.into(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Prompt in, text out. Opaque and non-deterministic.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: &Completion) -> Result<String>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for std::sync::Arc<T> {
    async fn complete(&self, request: &Completion) -> Result<String> {
        (**self).complete(request).await
    }
}

pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let api_key = config.resolve_api_key()?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, api_key })
    }

    async fn post(&self, url: &str, request: reqwest::RequestBuilder, body: &serde_json::Value) -> Result<serde_json::Value> {
        let res = match request.json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to connect to LLM at {}: {}", url, e);
                return Err(LlmCallError::Connection(e.to_string()).into());
            }
        };

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            log::error!("LLM Error {}: {}", status, error_text);
            return Err(LlmCallError::Status {
                status: status.as_u16(),
                body: error_text,
            }
            .into());
        }

        Ok(res.json().await?)
    }

    async fn complete_anthropic(&self, request: &Completion) -> Result<String> {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                {
                    "role": "user",
                    "content": request.prompt
                }
            ]
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let url = format!("{}/messages", self.config.api_url.trim_end_matches('/'));
        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        let response_json = self.post(&url, builder, &body).await?;

        // content: [{ "type": "text", "text": "..." }, ...]
        let blocks = response_json["content"]
            .as_array()
            .ok_or_else(|| anyhow!("Unexpected LLM response format: {}", response_json))?;
        let text: String = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        Ok(text)
    }

    async fn complete_openai(&self, request: &Completion) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": false
        });

        // Assume api_url is like "http://localhost:1234/v1"
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response_json = self.post(&url, builder, &body).await?;

        // Parse OpenAI format: choices[0].message.content
        let mut text = response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Unexpected LLM response format: {}", response_json))?;

        // Strip <think> tags if present
        if let Some(idx) = text.find("</think>") {
            text = text[idx + "</think>".len()..].trim().to_string();
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, request: &Completion) -> Result<String> {
        log::debug!(
            "Sending {} LLM request to {} (prompt {} chars, max_tokens {})",
            request.class.as_str(),
            self.config.model,
            request.prompt.len(),
            request.max_tokens
        );

        let text = match self.config.provider {
            LlmProvider::Anthropic => self.complete_anthropic(request).await?,
            LlmProvider::OpenAi => self.complete_openai(request).await?,
        };

        log::debug!("Received {} LLM response ({} chars)", request.class.as_str(), text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_picks_class_settings() {
        let config = GenerationConfig::default();
        let request = Completion::new(
            CallClass::Utility,
            CallClass::Utility.settings(&config),
            "summarize",
        )
        .with_system("be brief");

        assert_eq!(request.max_tokens, config.utility.max_tokens);
        assert_eq!(request.temperature, config.utility.temperature);
        assert_eq!(request.system.as_deref(), Some("be brief"));
    }

    #[test]
    fn openai_client_builds_without_key() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_url: "http://localhost:1234/v1".to_string(),
            ..LlmConfig::default()
        };
        assert!(LlmClient::new(config).is_ok());
    }
}
