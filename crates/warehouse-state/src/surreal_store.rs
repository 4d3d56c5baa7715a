//! SurrealDB-backed FlagStore implementation
//!
//! Uses `schema::FlagInsertRow` / `schema::FlagRow` for persistence,
//! converting to/from the public record types at the boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::handle::StoreConfig;
use crate::schema::{FlagInsertRow, FlagOutcome, FlagRecord, FlagRow, NewFlag};
use crate::storage_traits::{
    retry_on_contention, CycleReport, CycleUpdate, FlagCounts, FlagStore, StorageResult,
    INSERT_ATTEMPTS, INSERT_BACKOFF,
};

const FLAG_FIELDS: &str = "flag, exploit, target, reporter, created_at, status, outcome";

/// SurrealDB-backed implementation of [`FlagStore`].
#[derive(Clone)]
pub struct SurrealFlagStore {
    db: Surreal<Any>,
}

impl SurrealFlagStore {
    /// Connect using the given configuration.
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        let db = config.connect().await?;
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&StoreConfig::in_memory()).await
    }

    /// Create from environment variables (see [`StoreConfig::from_env`]).
    pub async fn from_env() -> StorageResult<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    async fn insert_once(&self, rows: Vec<FlagInsertRow>) -> StorageResult<usize> {
        #[derive(Deserialize)]
        struct Inserted {
            #[allow(dead_code)]
            flag: String,
        }

        let mut res = self
            .db
            .query("INSERT IGNORE INTO flags $rows RETURN flag")
            .bind(("rows", rows))
            .await?
            .check()?;

        let inserted: Vec<Inserted> = res.take(0)?;
        Ok(inserted.len())
    }
}

#[async_trait]
impl FlagStore for SurrealFlagStore {
    #[instrument(skip_all, fields(count = flags.len()))]
    async fn insert_flags(&self, flags: &[NewFlag]) -> StorageResult<usize> {
        if flags.is_empty() {
            return Ok(0);
        }
        let rows: Vec<FlagInsertRow> = flags.iter().map(FlagInsertRow::from).collect();
        let inserted = retry_on_contention(INSERT_ATTEMPTS, INSERT_BACKOFF, move || {
            self.insert_once(rows.clone())
        })
        .await?;
        debug!(inserted, "flags inserted");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn select_pending(&self, since: DateTime<Utc>) -> StorageResult<Vec<String>> {
        #[derive(Deserialize)]
        struct PendingRow {
            flag: String,
        }

        let mut res = self
            .db
            .query(
                "SELECT flag, created_at FROM flags \
                 WHERE created_at > $since AND status = 'pending' AND outcome = NONE \
                 ORDER BY created_at DESC",
            )
            .bind(("since", SurrealDatetime::from(since)))
            .await?
            .check()?;

        let rows: Vec<PendingRow> = res.take(0)?;
        Ok(rows.into_iter().map(|r| r.flag).collect())
    }

    #[instrument(skip_all, fields(resolutions = update.resolutions.len(), expire_before = %update.expire_before))]
    async fn apply_cycle(&self, update: CycleUpdate) -> StorageResult<CycleReport> {
        #[derive(Deserialize)]
        struct ReportRow {
            resolved: u64,
            expired: u64,
        }

        let mut success = Vec::new();
        let mut rejected = Vec::new();
        let mut too_old = Vec::new();
        for resolution in update.resolutions {
            match resolution.outcome {
                FlagOutcome::Success => success.push(resolution.value),
                FlagOutcome::Rejected => rejected.push(resolution.value),
                FlagOutcome::Expired => too_old.push(resolution.value),
            }
        }

        let sql = r#"
            BEGIN TRANSACTION;
            LET $ok = (UPDATE flags SET status = 'submitted', outcome = 'success'
                WHERE flag IN $success AND outcome = NONE RETURN flag);
            LET $rej = (UPDATE flags SET status = 'submitted', outcome = 'rejected'
                WHERE flag IN $rejected AND outcome = NONE RETURN flag);
            LET $old = (UPDATE flags SET status = 'submitted', outcome = 'expired'
                WHERE flag IN $too_old AND outcome = NONE RETURN flag);
            LET $aged = (UPDATE flags SET status = 'submitted', outcome = 'expired'
                WHERE status = 'pending' AND outcome = NONE AND created_at <= $cutoff RETURN flag);
            RETURN {
                resolved: array::len($ok) + array::len($rej) + array::len($old),
                expired: array::len($aged)
            };
            COMMIT TRANSACTION;
        "#;

        let mut res = self
            .db
            .query(sql)
            .bind(("success", success))
            .bind(("rejected", rejected))
            .bind(("too_old", too_old))
            .bind(("cutoff", SurrealDatetime::from(update.expire_before)))
            .await?
            .check()?;

        let last = res.num_statements().saturating_sub(1);
        let report: Option<ReportRow> = res.take(last)?;
        let report = report
            .map(|r| CycleReport {
                resolved: r.resolved,
                expired: r.expired,
            })
            .unwrap_or_default();
        debug!(resolved = report.resolved, expired = report.expired, "cycle committed");
        Ok(report)
    }

    #[instrument(skip(self))]
    async fn get_flag(&self, value: &str) -> StorageResult<Option<FlagRecord>> {
        let mut res = self
            .db
            .query(format!("SELECT {FLAG_FIELDS} FROM flags WHERE flag = $flag"))
            .bind(("flag", value.to_string()))
            .await?
            .check()?;

        let rows: Vec<FlagRow> = res.take(0)?;
        rows.into_iter().next().map(FlagRecord::try_from).transpose()
    }

    async fn count_by_status(&self) -> StorageResult<FlagCounts> {
        #[derive(Deserialize)]
        struct CountRow {
            status: String,
            outcome: Option<String>,
            total: u64,
        }

        let mut res = self
            .db
            .query("SELECT status, outcome, count() AS total FROM flags GROUP BY status, outcome")
            .await?
            .check()?;

        let rows: Vec<CountRow> = res.take(0)?;
        let mut counts = FlagCounts::default();
        for row in rows {
            match (row.status.as_str(), row.outcome.as_deref()) {
                ("pending", _) => counts.pending += row.total,
                (_, Some("success")) => counts.success += row.total,
                (_, Some("rejected")) => counts.rejected += row.total,
                (_, Some("expired")) => counts.expired += row.total,
                _ => {}
            }
        }
        Ok(counts)
    }
}
