use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use tracing::{error, warn};

use super::{RawVerdict, Submitter};
use crate::error::{DispatchError, SubmitError};
use crate::vocabulary::StatusVocabulary;

/// Header carrying the team credential.
pub const TEAM_TOKEN_HEADER: &str = "X-Team-Token";

const RATE_LIMIT_CODE: &str = "RATE_LIMIT";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply {
    Verdicts(Vec<RawVerdict>),
    Signal {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Batched request/response protocol: the whole batch in one JSON `PUT`.
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    http: reqwest::Client,
    url: Url,
    token: String,
    vocabulary: StatusVocabulary,
}

impl HttpSubmitter {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let invalid = |reason: String| DispatchError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };
        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            http,
            url: parsed,
            token: token.to_string(),
            vocabulary: StatusVocabulary::http(),
        })
    }

    fn network(&self, err: reqwest::Error) -> SubmitError {
        SubmitError::Network {
            endpoint: self.url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    fn name(&self) -> &'static str {
        "http"
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    async fn submit(&self, batch: &[String]) -> Result<Vec<RawVerdict>, SubmitError> {
        let resp = self
            .http
            .put(self.url.clone())
            .header(TEAM_TOKEN_HEADER, &self.token)
            .json(batch)
            .send()
            .await
            .map_err(|e| self.network(e))?;

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let body = resp.text().await.map_err(|e| self.network(e))?;

        if !is_json {
            error!("Received this response from the gameserver:\n\n{}\n", body);
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Reply>(&body) {
            Ok(Reply::Verdicts(verdicts)) => Ok(verdicts),
            Ok(Reply::Signal { code, message })
                if code.as_deref() == Some(RATE_LIMIT_CODE) =>
            {
                match message.filter(|m| !m.is_empty()) {
                    Some(msg) => warn!("{}", msg),
                    None => warn!("Rate limited by the gameserver"),
                }
                Ok(Vec::new())
            }
            Ok(Reply::Signal { .. }) | Err(_) => {
                error!("Submit result: {}", body);
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = HttpSubmitter::new("tcp://10.10.0.1:8080", "t", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidEndpoint { .. }));
        assert!(HttpSubmitter::new("not a url", "t", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let verdicts: Reply =
            serde_json::from_str(r#"[{"flag": "A=", "msg": "accepted"}]"#).unwrap();
        assert!(matches!(verdicts, Reply::Verdicts(v) if v.len() == 1));

        let signal: Reply =
            serde_json::from_str(r#"{"code": "RATE_LIMIT", "message": "slow down"}"#).unwrap();
        assert!(matches!(signal, Reply::Signal { code: Some(c), .. } if c == RATE_LIMIT_CODE));
    }
}
