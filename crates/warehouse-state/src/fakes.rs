//! In-memory fake for the storage trait (testing only)
//!
//! `MemoryFlagStore` satisfies the `FlagStore` contract without any external
//! dependencies. It can also be told to report contention for the next N
//! inserts, to exercise retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::schema::{FlagOutcome, FlagRecord, FlagStatus, NewFlag};
use crate::storage_traits::*;

/// In-memory flag store backed by a `HashMap<value, FlagRecord>`.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, FlagRecord>>,
    contended_inserts: AtomicU32,
    commits: AtomicU32,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` insert attempts fail with `StorageError::Contention`.
    pub fn contend_next_inserts(&self, n: u32) {
        self.contended_inserts.store(n, Ordering::SeqCst);
    }

    /// Number of `apply_cycle` calls committed so far.
    pub fn commit_count(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored record.
    pub fn all(&self) -> Vec<FlagRecord> {
        self.flags.lock().unwrap().values().cloned().collect()
    }

    fn insert_once(&self, flags: &[NewFlag]) -> StorageResult<usize> {
        let contended = self
            .contended_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if contended.is_ok() {
            return Err(StorageError::Contention("database is locked".to_string()));
        }

        let mut store = self.flags.lock().unwrap();
        let mut inserted = 0;
        for flag in flags {
            if !store.contains_key(&flag.value) {
                store.insert(flag.value.clone(), FlagRecord::pending(flag.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
    async fn insert_flags(&self, flags: &[NewFlag]) -> StorageResult<usize> {
        retry_on_contention(INSERT_ATTEMPTS, INSERT_BACKOFF, move || async move {
            self.insert_once(flags)
        })
        .await
    }

    async fn select_pending(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let store = self.flags.lock().unwrap();
        let mut rows: Vec<&FlagRecord> = store
            .values()
            .filter(|r| r.status == FlagStatus::Pending && r.outcome.is_none())
            .filter(|r| r.created_at > since)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows.into_iter().map(|r| r.value.clone()).collect())
    }

    async fn apply_cycle(&self, update: CycleUpdate) -> StorageResult<CycleReport> {
        let mut store = self.flags.lock().unwrap();
        let mut report = CycleReport::default();

        for resolution in update.resolutions {
            if let Some(record) = store.get_mut(&resolution.value) {
                if record.outcome.is_none() {
                    record.status = FlagStatus::Submitted;
                    record.outcome = Some(resolution.outcome);
                    report.resolved += 1;
                }
            }
        }

        for record in store.values_mut() {
            if record.status == FlagStatus::Pending
                && record.outcome.is_none()
                && record.created_at <= update.expire_before
            {
                record.status = FlagStatus::Submitted;
                record.outcome = Some(FlagOutcome::Expired);
                report.expired += 1;
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(report)
    }

    async fn get_flag(&self, value: &str) -> StorageResult<Option<FlagRecord>> {
        Ok(self.flags.lock().unwrap().get(value).cloned())
    }

    async fn count_by_status(&self) -> StorageResult<FlagCounts> {
        let store = self.flags.lock().unwrap();
        let mut counts = FlagCounts::default();
        for record in store.values() {
            match (record.status, record.outcome) {
                (FlagStatus::Pending, _) => counts.pending += 1,
                (_, Some(FlagOutcome::Success)) => counts.success += 1,
                (_, Some(FlagOutcome::Rejected)) => counts.rejected += 1,
                (_, Some(FlagOutcome::Expired)) => counts.expired += 1,
                (FlagStatus::Submitted, None) => {}
            }
        }
        Ok(counts)
    }
}
