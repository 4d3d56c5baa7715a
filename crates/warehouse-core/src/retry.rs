//! Execution controls: per-attempt timeout and retry with exponential backoff.
//!
//! Used for the transient-network steps of both engines (flag uploads from
//! the scheduler in particular), where a failed call is simply repeated a
//! bounded number of times before the failure is surfaced.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry configuration for a fallible async operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum wall-clock time for a single attempt (milliseconds, 0 = unbounded).
    pub timeout_ms: u64,
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::fmt::Display> {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("attempt timed out after {limit_ms}ms ({attempts} attempt(s))")]
    Timeout { attempts: u32, limit_ms: u64 },
}

impl<E: std::fmt::Display> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Timeout { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Execute `op` with per-attempt timeout and exponential backoff.
///
/// Returns the first success, or the last failure once `max_retries + 1`
/// attempts have been made.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 1;

    loop {
        let result = if policy.timeout_ms > 0 {
            tokio::time::timeout(Duration::from_millis(policy.timeout_ms), op()).await
        } else {
            Ok(op().await)
        };

        match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                warn!(attempt, error = %err, "{} failed, retrying", what);
            }
            Err(_elapsed) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Timeout {
                        attempts: attempt,
                        limit_ms: policy.timeout_ms,
                    });
                }
                warn!(attempt, limit_ms = policy.timeout_ms, "{} timed out, retrying", what);
            }
        }
        tokio::time::sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}
