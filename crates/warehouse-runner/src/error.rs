//! Error types for the exploit runner.

use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the warehouse server or the flag-id feed.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected our API token
    #[error("Wrong authorization token")]
    Unauthorized,

    /// Non-success HTTP status
    #[error("{url} responded with [{status}]")]
    Status { url: String, status: u16 },

    /// Connection refused, DNS failure, timeout...
    #[error("Could not connect to {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// Body could not be decoded
    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    /// Upload still failing after the retry budget
    #[error("Flag upload failed: {0}")]
    UploadFailed(String),

    /// Local file error (flag-id feed persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            ClientError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Fatal scheduler errors; each ends the process cleanly.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The configured flag format is not a valid regular expression
    #[error("Invalid flag format {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The exploit directory is missing
    #[error("The directory specified does not exist: {0}")]
    ExploitDirMissing(PathBuf),

    /// The exploit directory cannot be listed
    #[error("You do not have the necessary permissions to use this directory: {0}")]
    ExploitDirUnreadable(PathBuf),

    /// Startup configuration could not be obtained
    #[error("Configuration unavailable: {0}")]
    Config(#[from] ClientError),

    /// Other IO error while scanning exploits
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
