use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, SessionError};

/// Timeout and backoff applied to every engine call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Hard limit for a single attempt
    pub timeout: Duration,
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (0-based), doubling up to `max_backoff`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run one attempt under the hard timeout; expiry becomes `EngineError::Timeout`
pub async fn call_once<T, Fut>(timeout: Duration, call: Fut) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or retries run out.
///
/// `on_retry` is invoked before every retry with the error that caused it.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
    mut on_retry: impl FnMut(&EngineError),
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match call_once(policy.timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt > policy.max_retries {
            warn!("{} failed after {} attempt(s): {}", what, attempt, err);
            return Err(SessionError::EngineFailure {
                attempts: attempt,
                message: err.to_string(),
            });
        }

        let delay = policy.backoff(attempt - 1);
        debug!(
            "{} attempt {} failed ({}), retrying in {:?}",
            what, attempt, err, delay
        );
        on_retry(&err);
        tokio::time::sleep(delay).await;
    }
}
