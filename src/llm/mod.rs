//! Completion service boundary
//!
//! The model behind [`CompletionService`] is an untrusted dependency: every
//! call runs under a timeout, retryable failures are retried with exponential
//! backoff, and whatever text comes back is treated as a draft.

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::core::config::{CompletionConfig, CompletionProvider};

pub use openai::OpenAiService;

/// Failure talking to the completion service
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("completion timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("completion service is not configured: {0}")]
    NotConfigured(String),
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Timeout { .. }
                | CompletionError::Network(_)
                | CompletionError::RateLimited(_)
                | CompletionError::Unavailable(_)
        )
    }
}

/// System and user message of one completion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Output limits for one completion request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Budget {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }
}

/// Text completion backend
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt, budget: Budget) -> Result<String, CompletionError>;
}

/// Stand-in used when no provider is configured; every call fails
pub struct Unconfigured {
    reason: String,
}

impl Unconfigured {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionService for Unconfigured {
    fn name(&self) -> &str {
        "none"
    }

    async fn complete(&self, _prompt: &Prompt, _budget: Budget) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured(self.reason.clone()))
    }
}

/// Build the service selected by `[completion]`
pub fn from_config(config: &CompletionConfig) -> Arc<dyn CompletionService> {
    if config.provider == CompletionProvider::None {
        return Arc::new(Unconfigured::new("provider is 'none'"));
    }
    match OpenAiService::from_config(config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!(error = %e, "Completion service disabled");
            Arc::new(Unconfigured::new(e.to_string()))
        }
    }
}

/// Timeout and retry settings applied around every call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Call `service` under the policy's timeout, retrying retryable failures
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    prompt: &Prompt,
    budget: Budget,
    policy: RetryPolicy,
) -> Result<String, CompletionError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        let result = match timeout(policy.timeout, service.complete(prompt, budget)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout {
                seconds: policy.timeout.as_secs(),
            }),
        };

        match result {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                debug!(
                    service = service.name(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying completion request"
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, policy.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: CompletionError,
    }

    #[async_trait]
    impl CompletionService for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _prompt: &Prompt, _budget: Budget) -> Result<String, CompletionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok("done".to_string())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl CompletionService for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _prompt: &Prompt, _budget: Budget) -> Result<String, CompletionError> {
            sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "system".to_string(),
            user: "user".to_string(),
        }
    }

    fn budget() -> Budget {
        Budget {
            max_output_tokens: 100,
            temperature: 0.0,
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let service = Flaky {
            calls: AtomicU32::new(0),
            failures: 2,
            error: CompletionError::Unavailable("503".to_string()),
        };
        let text = complete_with_retry(&service, &prompt(), budget(), fast_policy(2))
            .await
            .unwrap();
        assert_eq!(text, "done");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let service = Flaky {
            calls: AtomicU32::new(0),
            failures: 5,
            error: CompletionError::Authentication("bad key".to_string()),
        };
        let err = complete_with_retry(&service, &prompt(), budget(), fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Authentication(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let err = complete_with_retry(&Slow, &prompt(), budget(), fast_policy(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let service = from_config(&CompletionConfig::default());
        assert_eq!(service.name(), "none");
        let err = service.complete(&prompt(), budget()).await.unwrap_err();
        assert!(matches!(err, CompletionError::NotConfigured(_)));
    }
}
