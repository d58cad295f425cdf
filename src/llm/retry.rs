//! Jittered exponential backoff around any [`Provider`], transparent to
//! the agent loop above it.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AgentError;
use crate::types::{Message, ToolDefinition};

use super::{CallOptions, Provider, ToolResponse};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub cap: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay for the given zero-based attempt, before jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    /// Applies +/- `jitter` fraction of randomness, then clamps to `cap`.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let spread = base * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let delay = (base + offset).max(0.0).min(self.cap.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

/// A transient failure the provider layer may retry, distinguished from a
/// run-fatal [`AgentError`] so the wrapper knows whether to loop again.
pub struct RetryableError {
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl RetryableError {
    pub fn classify(err: &AgentError) -> Option<RetryableError> {
        match err {
            AgentError::ProviderTransient(msg) => {
                Some(RetryableError { message: msg.clone(), retry_after: parse_retry_after(msg) })
            }
            _ => None,
        }
    }
}

/// Looks for a `retry-after: <seconds>` marker a vendor error message may
/// carry. Providers that parse a real `Retry-After` HTTP header should
/// embed the resulting seconds into the `ProviderTransient` message in
/// this form.
fn parse_retry_after(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let idx = lower.find("retry-after:")?;
    let rest = lower[idx + "retry-after:".len()..].trim();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run_with_retry<T, F, Fut>(&self, op: F) -> Result<T, AgentError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(retryable) = RetryableError::classify(&err) else {
                        return Err(err);
                    };
                    if attempt >= self.policy.max_retries {
                        return Err(AgentError::ProviderTransient(format!(
                            "exhausted {} retries: {}",
                            self.policy.max_retries, retryable.message
                        )));
                    }
                    let delay = retryable
                        .retry_after
                        .unwrap_or_else(|| self.policy.jittered_delay(attempt))
                        .min(self.policy.cap);
                    tracing::warn!(attempt, ?delay, error = %retryable.message, "provider call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn complete(&self, messages: &[Message], opts: CallOptions) -> Result<String, AgentError> {
        self.run_with_retry(|| self.inner.complete(messages, opts)).await
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: CallOptions,
    ) -> Result<ToolResponse, AgentError> {
        self.run_with_retry(|| self.inner.complete_with_tools(messages, tools, opts)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        fails_remaining: AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn complete(&self, _messages: &[Message], _opts: CallOptions) -> Result<String, AgentError> {
            if self.fails_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok() {
                return Err(AgentError::ProviderTransient("429 too many requests retry-after: 0".to_string()));
            }
            Ok("ok".to_string())
        }

        async fn complete_with_tools(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _opts: CallOptions,
        ) -> Result<ToolResponse, AgentError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let flaky = Arc::new(FlakyProvider { fails_remaining: AtomicU32::new(1) });
        let retrying = RetryingProvider::new(flaky, RetryPolicy::default());
        let result = retrying.complete(&[], CallOptions::default()).await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_transient_error() {
        let flaky = Arc::new(FlakyProvider { fails_remaining: AtomicU32::new(10) });
        let retrying = RetryingProvider::new(
            flaky,
            RetryPolicy { max_retries: 1, initial: Duration::from_millis(1), ..RetryPolicy::default() },
        );
        let result = retrying.complete(&[], CallOptions::default()).await;
        assert!(matches!(result, Err(AgentError::ProviderTransient(_))));
    }

    #[test]
    fn retry_after_override_is_parsed() {
        let delay = parse_retry_after("429 retry-after: 7 seconds");
        assert_eq!(delay, Some(Duration::from_secs(7)));
    }

    #[test]
    fn jittered_delay_respects_cap() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            assert!(policy.jittered_delay(attempt) <= policy.cap);
        }
    }
}
