//! Error types for flag submission.

use thiserror::Error;
use warehouse_state::StorageError;

/// Failure of a single submission call.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The scoring service could not be reached or the request failed in flight
    #[error("Could not send the flags to {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },
}

/// Dispatcher startup and cycle errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Protocol name not matching any submitter
    #[error("Invalid protocol {name:?}. Valid values are {valid:?}")]
    UnknownProtocol {
        name: String,
        valid: &'static [&'static str],
    },

    /// Submission endpoint unusable for the selected protocol
    #[error("Invalid submission endpoint {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Store failure while selecting or committing
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
