use async_trait::async_trait;
use tracing::debug;

use super::{RawVerdict, Submitter};
use crate::error::SubmitError;
use crate::vocabulary::{StatusVocabulary, Verdict};

/// Dry-run submitter: every flag is accepted, nothing is sent.
#[derive(Debug, Clone)]
pub struct DummySubmitter {
    vocabulary: StatusVocabulary,
}

impl DummySubmitter {
    pub fn new() -> Self {
        Self {
            vocabulary: StatusVocabulary::dummy(),
        }
    }
}

impl Default for DummySubmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submitter for DummySubmitter {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    async fn submit(&self, batch: &[String]) -> Result<Vec<RawVerdict>, SubmitError> {
        let accepted = self.vocabulary.token(Verdict::Accepted);
        Ok(batch
            .iter()
            .map(|flag| {
                debug!("Dummy submitter: submitting {}", flag);
                RawVerdict::new(flag.as_str(), accepted)
            })
            .collect())
    }
}
