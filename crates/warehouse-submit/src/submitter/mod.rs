//! Submitter capability and its protocol implementations.

mod dummy;
mod http;
mod line;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use dummy::DummySubmitter;
pub use http::HttpSubmitter;
pub use line::LineSubmitter;

use crate::config::{DispatcherConfig, Protocol};
use crate::error::{DispatchError, SubmitError};
use crate::vocabulary::StatusVocabulary;

/// One flag and the raw status the scoring service replied with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVerdict {
    pub flag: String,
    #[serde(rename = "msg")]
    pub status: String,
}

impl RawVerdict {
    pub fn new(flag: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            status: status.into(),
        }
    }
}

/// Turns a batch of flags into per-flag raw statuses.
///
/// An empty result means nothing usable happened (rate limit, protocol
/// error); the dispatcher backs off for a full interval.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Protocol name, for logs.
    fn name(&self) -> &'static str;

    /// Token table used to read this protocol's replies.
    fn vocabulary(&self) -> &StatusVocabulary;

    async fn submit(&self, batch: &[String]) -> Result<Vec<RawVerdict>, SubmitError>;
}

/// Build the submitter selected by `config.protocol`.
pub fn build_submitter(config: &DispatcherConfig) -> Result<Box<dyn Submitter>, DispatchError> {
    let timeout = config.request_timeout();
    let submitter: Box<dyn Submitter> = match config.protocol()? {
        Protocol::Dummy => Box::new(DummySubmitter::new()),
        Protocol::Http => Box::new(HttpSubmitter::new(
            &config.submit_url,
            &config.team_token,
            timeout,
        )?),
        Protocol::Line => Box::new(LineSubmitter::new(&config.submit_url, timeout)?),
    };
    Ok(submitter)
}
