//! Warehouse Runner - exploit scheduling for attack-defense rounds
//!
//! Provides a round-based scheduler that:
//! - Discovers executable exploits in a directory
//! - Runs every exploit against every target on a bounded worker pool
//! - Extracts flags from exploit output and reports them to the warehouse
//! - Paces rounds to the game's round duration

pub mod client;
pub mod config;
pub mod error;
pub mod exploit;
pub mod extractor;
pub mod scheduler;
pub mod supervisor;

// Re-export key types
pub use client::{Discovery, FlagUpload, UploadedFlag, WarehouseApi, WarehouseClient};
pub use config::{SchedulerConfig, ServerConfig};
pub use error::{ClientError, RunnerError};
pub use exploit::{discover_exploits, Exploit};
pub use extractor::FlagExtractor;
pub use scheduler::{ExploitScheduler, RoundOutcome};
pub use supervisor::{RunExit, RunReport, RunSupervisor};
