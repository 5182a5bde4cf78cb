use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::core::config::LlmConfig;
use crate::core::llm::{Completion, LlmCallError, TextGenerator};

/// Errors from other generators carry no classification and are retried.
fn is_retryable(e: &anyhow::Error) -> bool {
    e.downcast_ref::<LlmCallError>().is_none_or(LlmCallError::is_retryable)
}

/// Retries a failed call with exponential backoff. The last error is returned
/// once `max_attempts` calls have failed, or straight away for a rejection
/// that cannot succeed on retry (bad key, bad request).
pub struct RetryingGenerator<G> {
    inner: G,
    max_attempts: usize,
    base_delay: Duration,
}

impl<G: TextGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(inner: G, config: &LlmConfig) -> Self {
        Self::new(
            inner,
            config.max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        // attempt is 1-based; 1 -> base, 2 -> 2*base, 3 -> 4*base
        let factor = 1u32 << (attempt.saturating_sub(1).min(16) as u32);
        self.base_delay.saturating_mul(factor)
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for RetryingGenerator<G> {
    async fn complete(&self, request: &Completion) -> Result<String> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) if attempts < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_for(attempts);
                    log::warn!(
                        "{} call failed (attempt {}/{}): {}. Retrying in {:?}",
                        request.class.as_str(),
                        attempts,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if !is_retryable(&e) => {
                    log::error!("{} call rejected, not retrying: {}", request.class.as_str(), e);
                    return Err(e);
                }
                Err(e) => {
                    log::error!(
                        "{} call failed after {} attempts: {}",
                        request.class.as_str(),
                        attempts,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GenerationConfig;
    use crate::core::llm::CallClass;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Flaky {
        async fn complete(&self, _request: &Completion) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("connection reset");
            }
            Ok("fine".to_string())
        }
    }

    fn request() -> Completion {
        Completion::new(
            CallClass::Content,
            GenerationConfig::default().content,
            "hello",
        )
    }

    #[tokio::test]
    async fn recovers_within_budget() {
        let gen = RetryingGenerator::new(
            Flaky { failures: 2, calls: AtomicUsize::new(0) },
            3,
            Duration::ZERO,
        );
        assert_eq!(gen.complete(&request()).await.unwrap(), "fine");
        assert_eq!(gen.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let gen = RetryingGenerator::new(
            Flaky { failures: 5, calls: AtomicUsize::new(0) },
            2,
            Duration::ZERO,
        );
        let err = gen.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(gen.inner.calls.load(Ordering::SeqCst), 2);
    }

    struct Rejecting {
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Rejecting {
        async fn complete(&self, _request: &Completion) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmCallError::Status {
                status: self.status,
                body: "{}".to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        for status in [400, 401, 403, 404] {
            let gen = RetryingGenerator::new(
                Rejecting { status, calls: AtomicUsize::new(0) },
                3,
                Duration::ZERO,
            );
            let err = gen.complete(&request()).await.unwrap_err();
            assert!(err.to_string().contains(&status.to_string()));
            assert_eq!(gen.inner.calls.load(Ordering::SeqCst), 1, "status {status}");
        }
    }

    #[tokio::test]
    async fn overload_and_rate_limits_are_retried() {
        for status in [429, 500, 503, 529] {
            let gen = RetryingGenerator::new(
                Rejecting { status, calls: AtomicUsize::new(0) },
                3,
                Duration::ZERO,
            );
            assert!(gen.complete(&request()).await.is_err());
            assert_eq!(gen.inner.calls.load(Ordering::SeqCst), 3, "status {status}");
        }
    }

    #[test]
    fn connection_failures_are_retryable() {
        assert!(LlmCallError::Connection("reset".into()).is_retryable());
        assert!(is_retryable(&anyhow::anyhow!("opaque failure")));
    }

    #[test]
    fn backoff_doubles() {
        let gen = RetryingGenerator::new(
            Flaky { failures: 0, calls: AtomicUsize::new(0) },
            3,
            Duration::from_millis(100),
        );
        assert_eq!(gen.delay_for(1), Duration::from_millis(100));
        assert_eq!(gen.delay_for(3), Duration::from_millis(400));
    }
}
