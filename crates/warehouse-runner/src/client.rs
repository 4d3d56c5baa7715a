//! HTTP client for the warehouse server and the flag-id feed.
//!
//! Every request to the warehouse carries the operator's token in the
//! `X-Auth-Token` header. Flag uploads are fire-and-forget from the
//! scheduler's point of view: [`WarehouseApi::report`] hands the upload to a
//! background task and returns immediately, so a slow server never holds up
//! an exploit run.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use warehouse_core::{retry_with_backoff, RetryPolicy};

use crate::config::ServerConfig;
use crate::error::ClientError;

/// Header carrying the operator's API token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Timeout for fetching the flag-id feed.
pub const FLAG_IDS_TIMEOUT: Duration = Duration::from_secs(15);

/// Timestamp layout used on the wire.
const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Flags extracted from one output line of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub exploit: String,
    pub target: String,
    pub flags: Vec<String>,
    pub detected_at: DateTime<Local>,
}

/// One flag entry of an upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedFlag {
    pub flag: String,
    pub exploit_name: String,
    pub team_ip: String,
    pub time: String,
}

/// Body of `POST /api/upload_flags`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagUpload {
    pub username: String,
    pub flags: Vec<UploadedFlag>,
}

impl FlagUpload {
    pub fn from_discovery(operator: &str, discovery: &Discovery) -> Self {
        let time = discovery.detected_at.format(WIRE_TIME_FORMAT).to_string();
        let flags = discovery
            .flags
            .iter()
            .map(|flag| UploadedFlag {
                flag: flag.clone(),
                exploit_name: discovery.exploit.clone(),
                team_ip: discovery.target.clone(),
                time: time.clone(),
            })
            .collect();
        Self {
            username: operator.to_string(),
            flags,
        }
    }
}

/// What the scheduler needs from the warehouse side.
#[async_trait]
pub trait WarehouseApi: Send + Sync {
    /// Cheap reachability probe performed at the start of every round.
    async fn check_liveness(&self) -> Result<(), ClientError>;

    /// Download the flag-id feed and store it verbatim at `dest`.
    async fn fetch_flag_ids(&self, url: &str, dest: &Path) -> Result<(), ClientError>;

    /// Hand a discovery off for reporting without waiting for it.
    fn report(&self, discovery: Discovery);
}

/// reqwest-backed client for the warehouse HTTP API.
#[derive(Debug, Clone)]
pub struct WarehouseClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    operator: String,
    upload_policy: RetryPolicy,
}

impl WarehouseClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        operator: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("warehouse-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::from_reqwest(&base_url, e))?;

        Ok(Self {
            http,
            base_url,
            token: token.into(),
            operator: operator.into(),
            upload_policy: RetryPolicy::default(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the game configuration.
    ///
    /// `403` maps to [`ClientError::Unauthorized`]; any other non-200 status
    /// to [`ClientError::Status`].
    pub async fn fetch_config(&self) -> Result<ServerConfig, ClientError> {
        let url = format!("{}/api/get_config", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header(AUTH_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&self.base_url, e))?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::FORBIDDEN => return Err(ClientError::Unauthorized),
            status => {
                return Err(ClientError::Status {
                    url: format!("GET {url}"),
                    status: status.as_u16(),
                })
            }
        }

        let config: ServerConfig = resp
            .json()
            .await
            .map_err(|e| ClientError::from_reqwest(&url, e))?;
        debug!(?config, "Received server configuration");
        Ok(config)
    }

    /// Post one upload, retrying transient failures.
    pub async fn upload_flags(&self, upload: &FlagUpload) -> Result<(), ClientError> {
        let url = format!("{}/api/upload_flags", self.base_url);
        let url = url.as_str();
        retry_with_backoff(&self.upload_policy, "flag upload", move || async move {
            let resp = self
                .http
                .post(url)
                .header(AUTH_HEADER, &self.token)
                .json(upload)
                .send()
                .await
                .map_err(|e| ClientError::from_reqwest(url, e))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(ClientError::Status {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                })
            }
        })
        .await
        .map_err(|e| ClientError::UploadFailed(e.to_string()))
    }
}

#[async_trait]
impl WarehouseApi for WarehouseClient {
    async fn check_liveness(&self) -> Result<(), ClientError> {
        self.http
            .head(&self.base_url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_reqwest(&self.base_url, e))
    }

    async fn fetch_flag_ids(&self, url: &str, dest: &Path) -> Result<(), ClientError> {
        let resp = self
            .http
            .get(url)
            .timeout(FLAG_IDS_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(url, e))?;

        if resp.status() != StatusCode::OK {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(url, e))?;
        tokio::fs::write(dest, &body).await?;
        debug!(path = %dest.display(), bytes = body.len(), "Stored flag ids");
        Ok(())
    }

    fn report(&self, discovery: Discovery) {
        let client = self.clone();
        let upload = FlagUpload::from_discovery(&self.operator, &discovery);
        tokio::spawn(async move {
            match client.upload_flags(&upload).await {
                Ok(()) => info!(
                    exploit = %discovery.exploit,
                    target = %discovery.target,
                    count = upload.flags.len(),
                    "Flags uploaded"
                ),
                Err(e) => error!(
                    exploit = %discovery.exploit,
                    target = %discovery.target,
                    error = %e,
                    "Could not upload flags"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_upload_body_matches_wire_format() {
        let discovery = Discovery {
            exploit: "pwn.py".to_string(),
            target: "10.60.3.1".to_string(),
            flags: vec!["FLAG_A".to_string(), "FLAG_B".to_string()],
            detected_at: Local.with_ymd_and_hms(2024, 5, 18, 13, 4, 9).unwrap(),
        };

        let upload = FlagUpload::from_discovery("alice", &discovery);
        let json = serde_json::to_value(&upload).unwrap();

        assert_eq!(json["username"], "alice");
        assert_eq!(json["flags"].as_array().unwrap().len(), 2);
        assert_eq!(json["flags"][0]["flag"], "FLAG_A");
        assert_eq!(json["flags"][0]["exploit_name"], "pwn.py");
        assert_eq!(json["flags"][0]["team_ip"], "10.60.3.1");
        assert_eq!(json["flags"][1]["time"], "2024-05-18 13:04:09");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = WarehouseClient::new("http://localhost:5555/", "tok", "alice").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5555");
    }
}
