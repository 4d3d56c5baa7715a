//! Storage trait definitions for the flag warehouse
//!
//! `FlagStore` is the only contract the two engines share:
//! - the ingestion path calls `insert_flags` (idempotent, contention-retried)
//! - the dispatcher calls `select_pending` and `apply_cycle`
//!
//! All operations are async and backend-agnostic. An in-memory fake is
//! provided for testing via the `fakes` module.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::schema::{FlagOutcome, FlagRecord, NewFlag};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Attempts made by `insert_flags` before a contention error surfaces.
pub const INSERT_ATTEMPTS: u32 = 5;

/// Pause between contended insert attempts.
pub const INSERT_BACKOFF: Duration = Duration::from_millis(200);

/// Outcome decided for one flag by a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagResolution {
    pub value: String,
    pub outcome: FlagOutcome,
}

impl FlagResolution {
    pub fn new(value: impl Into<String>, outcome: FlagOutcome) -> Self {
        Self {
            value: value.into(),
            outcome,
        }
    }
}

/// All row mutations produced by one dispatcher cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleUpdate {
    /// Outcomes reconciled from submitter responses
    pub resolutions: Vec<FlagResolution>,
    /// Pending rows created at or before this instant are expired
    pub expire_before: DateTime<Utc>,
}

impl CycleUpdate {
    pub fn new(expire_before: DateTime<Utc>) -> Self {
        Self {
            resolutions: Vec::new(),
            expire_before,
        }
    }

    pub fn resolve(&mut self, value: impl Into<String>, outcome: FlagOutcome) {
        self.resolutions.push(FlagResolution::new(value, outcome));
    }
}

/// What `apply_cycle` actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Rows that received an outcome from a resolution
    pub resolved: u64,
    /// Rows aged out by the expiry sweep
    pub expired: u64,
}

/// Row counts per lifecycle bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagCounts {
    pub pending: u64,
    pub success: u64,
    pub rejected: u64,
    pub expired: u64,
}

impl FlagCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.success + self.rejected + self.expired
    }
}

/// Durable flag store.
///
/// Guarantees:
/// - `value` is unique; inserting an existing value is a no-op.
/// - An outcome, once set, is never overwritten.
/// - `apply_cycle` is atomic: either every mutation of the cycle lands or none.
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Insert flags, ignoring values already present. Returns rows inserted.
    async fn insert_flags(&self, flags: &[NewFlag]) -> StorageResult<usize>;

    /// Values still pending with no outcome, created strictly after `since`,
    /// newest first.
    async fn select_pending(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>>;

    /// Apply resolutions then the expiry sweep as one transaction.
    async fn apply_cycle(&self, update: CycleUpdate) -> StorageResult<CycleReport>;

    /// Fetch one flag by value.
    async fn get_flag(&self, value: &str) -> StorageResult<Option<FlagRecord>>;

    /// Count rows per lifecycle bucket.
    async fn count_by_status(&self) -> StorageResult<FlagCounts>;
}

/// Run `op` until it succeeds, fails with a non-contention error, or
/// `attempts` is exhausted; the last error is returned as-is.
pub async fn retry_on_contention<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_contention() && attempt < attempts => {
                warn!(attempt, error = %err, "store contended, retrying");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_contention() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_on_contention(5, Duration::from_millis(200), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::Contention("locked".into()))
                } else {
                    Ok(7usize)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_surfaces_error_after_last_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = retry_on_contention(5, Duration::from_millis(200), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StorageError::Contention("locked".into()))
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_contention());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_hard_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = retry_on_contention(5, Duration::from_millis(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StorageError::Backend("syntax".into()))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flag_counts_total() {
        let counts = FlagCounts {
            pending: 1,
            success: 2,
            rejected: 3,
            expired: 4,
        };
        assert_eq!(counts.total(), 10);
    }
}
