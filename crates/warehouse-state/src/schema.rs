//! Schema definitions for the `flags` table
//!
//! One row per distinct flag value. The value doubles as the record key, so
//! a second insert of the same flag is ignored rather than duplicated.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Whether the dispatcher has made a definitive submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Pending,
    Submitted,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Pending => "pending",
            FlagStatus::Submitted => "submitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FlagStatus::Pending),
            "submitted" => Some(FlagStatus::Submitted),
            _ => None,
        }
    }
}

/// Terminal classification of a submitted flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagOutcome {
    Success,
    Rejected,
    Expired,
}

impl FlagOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagOutcome::Success => "success",
            FlagOutcome::Rejected => "rejected",
            FlagOutcome::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FlagOutcome::Success),
            "rejected" => Some(FlagOutcome::Rejected),
            "expired" => Some(FlagOutcome::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlagOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly discovered flag, as received by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlag {
    /// The flag string (primary key)
    pub value: String,
    /// Exploit that produced it
    pub exploit: String,
    /// Target the exploit ran against
    pub target: String,
    /// Operator who ran the exploit
    pub reporter: String,
    /// Detection time, second precision
    pub created_at: DateTime<Utc>,
}

impl NewFlag {
    /// Create a new flag record, truncating the timestamp to whole seconds.
    pub fn new(
        value: impl Into<String>,
        exploit: impl Into<String>,
        target: impl Into<String>,
        reporter: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value: value.into(),
            exploit: exploit.into(),
            target: target.into(),
            reporter: reporter.into(),
            created_at: created_at.trunc_subsecs(0),
        }
    }
}

/// A stored flag with its submission lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub value: String,
    pub exploit: String,
    pub target: String,
    pub reporter: String,
    pub created_at: DateTime<Utc>,
    pub status: FlagStatus,
    /// Set only once `status` is `Submitted`; never overwritten afterwards.
    pub outcome: Option<FlagOutcome>,
}

impl FlagRecord {
    /// A pending record for a newly inserted flag.
    pub fn pending(flag: NewFlag) -> Self {
        Self {
            value: flag.value,
            exploit: flag.exploit,
            target: flag.target,
            reporter: flag.reporter,
            created_at: flag.created_at,
            status: FlagStatus::Pending,
            outcome: None,
        }
    }

    /// Whether the record has reached a terminal outcome.
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Row shape used when inserting: `id` becomes the record key `flags:⟨value⟩`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct FlagInsertRow {
    pub id: String,
    pub flag: String,
    pub exploit: String,
    pub target: String,
    pub reporter: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    pub status: String,
}

impl From<&NewFlag> for FlagInsertRow {
    fn from(flag: &NewFlag) -> Self {
        Self {
            id: flag.value.clone(),
            flag: flag.value.clone(),
            exploit: flag.exploit.clone(),
            target: flag.target.clone(),
            reporter: flag.reporter.clone(),
            created_at: flag.created_at,
            status: FlagStatus::Pending.as_str().to_string(),
        }
    }
}

/// Row shape returned by explicit-field selects (no record id).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FlagRow {
    pub flag: String,
    pub exploit: String,
    pub target: String,
    pub reporter: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub outcome: Option<String>,
}

impl TryFrom<FlagRow> for FlagRecord {
    type Error = StorageError;

    fn try_from(row: FlagRow) -> Result<Self, Self::Error> {
        let status = FlagStatus::parse(&row.status).ok_or_else(|| StorageError::CorruptRow {
            flag: row.flag.clone(),
            reason: format!("unknown status: {}", row.status),
        })?;
        let outcome = match row.outcome.as_deref() {
            None => None,
            Some(raw) => Some(FlagOutcome::parse(raw).ok_or_else(|| {
                StorageError::CorruptRow {
                    flag: row.flag.clone(),
                    reason: format!("unknown outcome: {raw}"),
                }
            })?),
        };
        Ok(FlagRecord {
            value: row.flag,
            exploit: row.exploit,
            target: row.target,
            reporter: row.reporter,
            created_at: row.created_at,
            status,
            outcome,
        })
    }
}
