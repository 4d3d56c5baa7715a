//! Dispatcher configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Submission protocol spoken to the scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Accept everything locally; nothing leaves the process
    Dummy,
    /// One JSON `PUT` per batch
    Http,
    /// One line per flag over a TCP stream
    Line,
}

impl Protocol {
    /// Every accepted spelling, aliases included.
    pub const NAMES: &'static [&'static str] = &["dummy", "http", "ccit", "line", "faust"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Dummy => "dummy",
            Protocol::Http => "http",
            Protocol::Line => "line",
        }
    }
}

impl FromStr for Protocol {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dummy" => Ok(Protocol::Dummy),
            "http" | "ccit" => Ok(Protocol::Http),
            "line" | "faust" => Ok(Protocol::Line),
            _ => Err(DispatchError::UnknownProtocol {
                name: s.to_string(),
                valid: Self::NAMES,
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of the submission loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Protocol name, validated when the dispatcher is built
    pub protocol: String,
    /// Scoring service endpoint (`http://…` or `tcp://host:port`)
    pub submit_url: String,
    /// Team credential sent with HTTP submissions
    pub team_token: String,
    /// Maximum batches per interval
    pub requests_per_interval: u32,
    /// Cycle cadence in seconds
    pub interval_secs: u64,
    /// Maximum flags per batch
    pub batch_size: usize,
    /// Flags older than this are expired instead of submitted
    pub flag_lifetime_secs: u64,
    /// Delay before the first cycle
    pub warmup_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http.as_str().to_string(),
            submit_url: "http://10.10.0.1:8080/flags".to_string(),
            team_token: String::new(),
            requests_per_interval: 1,
            interval_secs: 20,
            batch_size: 500,
            flag_lifetime_secs: 5 * 120,
            warmup_secs: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn protocol(&self) -> Result<Protocol, DispatchError> {
        self.protocol.parse()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn flag_lifetime(&self) -> Duration {
        Duration::from_secs(self.flag_lifetime_secs)
    }

    /// Per-request budget so that every request of an interval fits in it.
    pub fn request_timeout(&self) -> Duration {
        self.interval() / self.requests_per_interval.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.protocol().unwrap(), Protocol::Http);
        assert_eq!(cfg.requests_per_interval, 1);
        assert_eq!(cfg.interval(), Duration::from_secs(20));
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.flag_lifetime(), Duration::from_secs(600));
        assert_eq!(cfg.warmup(), Duration::from_secs(5));
    }

    #[test]
    fn test_request_timeout_splits_interval() {
        let cfg = DispatcherConfig {
            requests_per_interval: 4,
            interval_secs: 20,
            ..Default::default()
        };
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_protocol_aliases() {
        assert_eq!("ccit".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!("FAUST".parse::<Protocol>().unwrap(), Protocol::Line);
        assert_eq!("dummy".parse::<Protocol>().unwrap(), Protocol::Dummy);
    }

    #[test]
    fn test_unknown_protocol_lists_valid_names() {
        let err = "carrier-pigeon".parse::<Protocol>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("carrier-pigeon"));
        assert!(msg.contains("faust"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: DispatcherConfig =
            serde_json::from_str(r#"{"protocol": "faust", "batch_size": 50}"#).unwrap();
        assert_eq!(cfg.protocol().unwrap(), Protocol::Line);
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.interval_secs, 20);
    }
}
