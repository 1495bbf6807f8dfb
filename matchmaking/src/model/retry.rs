//! Bounded exponential backoff around a single model call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::{ModelClient, ModelError, ModelRequest, ModelResponse};
use crate::rate_limit::RateLimiter;

/// Backoff policy for retryable model errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Call the client with a per-attempt timeout, retrying retryable failures.
///
/// With a `limiter`, every attempt takes one token before it is sent; the
/// wait for the token is not counted against `call_timeout`. Fatal errors
/// are returned after the first attempt. The last retryable error is
/// returned once the attempt budget is exhausted.
pub async fn call_with_retry(
    client: &dyn ModelClient,
    request: &ModelRequest,
    policy: &RetryPolicy,
    call_timeout: Duration,
    limiter: Option<&RateLimiter>,
) -> Result<ModelResponse, ModelError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if let Some(limiter) = limiter {
            limiter.acquire().await;
        }
        let result = match tokio::time::timeout(call_timeout, client.evaluate(request.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(call_timeout)),
        };

        match result {
            Ok(response) => {
                if attempt > 1 {
                    debug!(prompt = %request.prompt_name, attempt, "model call recovered");
                }
                return Ok(response);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    prompt = %request.prompt_name,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "retryable model error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::client::{ModelSettings, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        calls: AtomicU32,
        script: Mutex<Vec<Result<ModelResponse, ModelError>>>,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<ModelResponse, ModelError>>) -> Self {
            script.reverse();
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn evaluate(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ModelError::Transient("script exhausted".into())))
        }
    }

    struct Hanging;

    #[async_trait]
    impl ModelClient for Hanging {
        async fn evaluate(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ModelError::Transient("unreachable".into()))
        }
    }

    fn ok() -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse {
            content: "{}".into(),
            usage: TokenUsage::default(),
            model: "test".into(),
        })
    }

    fn request() -> ModelRequest {
        ModelRequest {
            prompt_name: "debate.advocate".into(),
            prompt_version: 1,
            variables: Default::default(),
            system: String::new(),
            rendered: "hello".into(),
            settings: ModelSettings::default(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(30));
        assert_eq!(policy.delay_after(60), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let client = Scripted::new(vec![Err(ModelError::Transient("503".into())), ok()]);
        let start = tokio::time::Instant::now();
        let resp = call_with_retry(
            &client,
            &request(),
            &RetryPolicy::default(),
            Duration::from_secs(30),
            None,
        )
        .await;
        assert!(resp.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_not_retried() {
        let client = Scripted::new(vec![Err(ModelError::Fatal("401".into())), ok()]);
        let err = call_with_retry(
            &client,
            &request(),
            &RetryPolicy::default(),
            Duration::from_secs(30),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err, ModelError::Fatal("401".into()));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_returns_last_error() {
        let client = Scripted::new(vec![
            Err(ModelError::Transient("a".into())),
            Err(ModelError::RateLimited("b".into())),
            Err(ModelError::Transient("c".into())),
            ok(),
        ]);
        let err = call_with_retry(
            &client,
            &request(),
            &RetryPolicy::default(),
            Duration::from_secs(30),
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err, ModelError::Transient("c".into()));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_retryable_timeout() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let err = call_with_retry(&Hanging, &request(), &policy, Duration::from_secs(30), None)
            .await
            .unwrap_err();
        assert_eq!(err, ModelError::Timeout(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_takes_a_limiter_token() {
        let client = Scripted::new(vec![
            Err(ModelError::Transient("a".into())),
            Err(ModelError::Transient("b".into())),
            ok(),
        ]);
        let limiter = RateLimiter::per_minute(1).unwrap();
        let policy = RetryPolicy {
            base_delay_ms: 10,
            max_delay_ms: 10,
            max_attempts: 3,
        };
        let start = tokio::time::Instant::now();
        let resp = call_with_retry(
            &client,
            &request(),
            &policy,
            Duration::from_secs(5),
            Some(&limiter),
        )
        .await;
        assert!(resp.is_ok());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        // one token up front, then one per minute; token waits never time out
        assert!(start.elapsed() >= Duration::from_secs(119));
    }
}
