use std::time::Duration;

use serde_json::Value;

use crate::client::GenerationClient;
use crate::config::CoordinatorConfig;

use super::{ErrorClassifier, GenerationError, RemoteError, Retry};

/// How often and how patiently a request is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, at least `1`.
    pub max_attempts: u32,
    /// The delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay,
            attempt_timeout: config.attempt_timeout,
        }
    }

    /// The delay after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Runs a single attempt, bounded by the policy's timeout.
async fn attempt(
    client: &dyn GenerationClient,
    policy: &RetryPolicy,
    kind: &str,
    payload: &Value,
) -> Result<Value, RemoteError> {
    let call = client.generate(kind, payload);
    match policy.attempt_timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .unwrap_or_else(|_| Err(RemoteError::timeout(timeout))),
        None => call.await,
    }
}

/// Calls the endpoint until it succeeds, fails terminally, or runs out of attempts.
///
/// Terminal failures (per `classifier`) are returned right away as
/// [`GenerationError::Rejected`]. Retryable failures are retried with exponential backoff, and the
/// last one is returned as [`GenerationError::Failed`] once all attempts are used up.
pub async fn execute_with_retry(
    client: &dyn GenerationClient,
    classifier: &dyn ErrorClassifier,
    policy: &RetryPolicy,
    kind: &str,
    payload: &Value,
) -> Result<Value, GenerationError> {
    let mut attempt_no = 0;
    loop {
        let error = match attempt(client, policy, kind, payload).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if classifier.classify(&error) == Retry::Terminal {
            metric!(counter("coordinator.failed") += 1, "type" => kind, "reason" => "terminal");
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                "Generation `{}` was rejected",
                kind
            );
            return Err(GenerationError::Rejected {
                status: error.status,
                message: error.message,
            });
        }

        attempt_no += 1;
        if attempt_no >= policy.max_attempts {
            metric!(counter("coordinator.failed") += 1, "type" => kind, "reason" => "exhausted");
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                attempts = attempt_no,
                "Generation `{}` failed",
                kind
            );
            return Err(GenerationError::Failed {
                attempts: attempt_no,
                message: error.message,
            });
        }

        let delay = policy.backoff(attempt_no - 1);
        metric!(counter("coordinator.retry") += 1, "type" => kind);
        tracing::warn!(
            error = &error as &dyn std::error::Error,
            attempt = attempt_no,
            "Generation `{}` failed, retrying in {:?}",
            kind,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}
