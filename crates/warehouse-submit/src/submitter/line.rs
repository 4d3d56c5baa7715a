use std::collections::HashSet;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{error, warn};

use super::{RawVerdict, Submitter};
use crate::error::{DispatchError, SubmitError};
use crate::vocabulary::StatusVocabulary;

/// Line-oriented protocol: banner, then one flag per line, one reply per flag.
///
/// Replies read `<flag> <status> [detail]`. A connection problem anywhere in
/// the exchange drops the whole batch; its flags stay pending.
#[derive(Debug, Clone)]
pub struct LineSubmitter {
    addr: String,
    timeout: Duration,
    vocabulary: StatusVocabulary,
}

impl LineSubmitter {
    /// `url` is `tcp://host:port[/]` or plain `host:port`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let addr = url
            .trim()
            .trim_start_matches("tcp://")
            .trim_end_matches('/')
            .to_string();
        let valid_port = addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid_port {
            return Err(DispatchError::InvalidEndpoint {
                url: url.to_string(),
                reason: "expected tcp://host:port".to_string(),
            });
        }

        Ok(Self {
            addr,
            timeout,
            vocabulary: StatusVocabulary::line(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn exchange(&self, batch: &[String]) -> io::Result<Vec<RawVerdict>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Banner ends at the first blank line.
        loop {
            match lines.next_line().await? {
                Some(line) if line.trim().is_empty() => break,
                Some(_) => continue,
                None => return Err(io::ErrorKind::UnexpectedEof.into()),
            }
        }

        let mut sent: HashSet<&str> = HashSet::new();
        let mut verdicts = Vec::with_capacity(batch.len());
        for flag in batch {
            if !sent.insert(flag.as_str()) {
                continue;
            }
            writer.write_all(flag.as_bytes()).await?;
            writer.write_all(b"\n").await?;

            let reply = lines
                .next_line()
                .await?
                .ok_or(io::Error::from(io::ErrorKind::UnexpectedEof))?;
            let mut tokens = reply.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some(echo), Some(status)) if sent.contains(echo) => {
                    verdicts.push(RawVerdict::new(echo, status));
                }
                _ => warn!("Skipping response line {:?}", reply),
            }
        }

        writer.shutdown().await.ok();
        Ok(verdicts)
    }
}

#[async_trait]
impl Submitter for LineSubmitter {
    fn name(&self) -> &'static str {
        "line"
    }

    fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    async fn submit(&self, batch: &[String]) -> Result<Vec<RawVerdict>, SubmitError> {
        match tokio::time::timeout(self.timeout, self.exchange(batch)).await {
            Ok(Ok(verdicts)) => Ok(verdicts),
            Ok(Err(e)) => {
                error!(addr = %self.addr, error = %e, "Line submission aborted");
                Ok(Vec::new())
            }
            Err(_) => {
                error!(addr = %self.addr, "Line submission timed out after {:?}", self.timeout);
                Ok(Vec::new())
            }
        }
    }
}
