//! Scheduler configuration: what the server tells us and what the operator sets locally.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Game parameters served by `GET /api/get_config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Flag format (regular expression)
    #[serde(rename = "format")]
    pub flag_format: String,

    /// Round duration in seconds
    #[serde(rename = "round")]
    pub round_secs: u64,

    /// Target addresses
    pub teams: Vec<String>,

    /// Optional flag-id feed URL
    #[serde(rename = "flagid_url", default, skip_serializing_if = "Option::is_none")]
    pub flag_ids_url: Option<String>,
}

impl ServerConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_secs)
    }

    /// Per-run timeout: half the round, rounded up.
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.round_secs.div_ceil(2))
    }

    pub fn targets(&self) -> &[String] {
        &self.teams
    }

    /// The flag-id feed, if the game publishes one. An empty URL means none.
    pub fn flag_ids_feed(&self) -> Option<&str> {
        self.flag_ids_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Operator-side scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Directory scanned for exploits at the start of every round
    pub exploit_dir: PathBuf,

    /// Upper bound on concurrent exploit runs
    pub max_workers: usize,

    /// Where the flag-id feed is stored for exploits to read
    pub flag_ids_path: PathBuf,

    /// Name the discoveries are reported under
    pub operator: String,
}

impl SchedulerConfig {
    pub fn new(exploit_dir: impl Into<PathBuf>, operator: impl Into<String>) -> Self {
        Self {
            exploit_dir: exploit_dir.into(),
            max_workers: 64,
            flag_ids_path: PathBuf::from("flag_ids.json"),
            operator: operator.into(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_flag_ids_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.flag_ids_path = path.into();
        self
    }
}
