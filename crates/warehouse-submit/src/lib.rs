//! Warehouse Submit - flag submission to the scoring service
//!
//! Provides:
//! - A `Submitter` capability with dummy, batched HTTP and line-oriented TCP implementations
//! - Per-protocol status vocabularies mapping raw reply tokens to outcomes
//! - A duplicate-free, newest-first backlog queue
//! - The submission dispatcher loop: select, batch, submit, reconcile, expire, commit

pub mod backlog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod submitter;
pub mod vocabulary;

// Re-export key types
pub use backlog::BacklogQueue;
pub use config::{DispatcherConfig, Protocol};
pub use dispatcher::{CycleSummary, Dispatcher};
pub use error::{DispatchError, SubmitError};
pub use submitter::{
    build_submitter, DummySubmitter, HttpSubmitter, LineSubmitter, RawVerdict, Submitter,
};
pub use vocabulary::{BatchTally, StatusVocabulary, Verdict};
