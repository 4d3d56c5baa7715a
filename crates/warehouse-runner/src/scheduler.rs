//! Round-based exploit scheduling.
//!
//! Each round: probe the server, refresh the flag-id feed, rescan the
//! exploit directory, then run every (exploit, target) pair on a bounded
//! worker pool in random order. A round that finishes early sleeps out the
//! remainder of the round duration.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, error, info, Instrument, Span};
use warehouse_core::obs;

use crate::client::WarehouseApi;
use crate::config::{SchedulerConfig, ServerConfig};
use crate::error::RunnerError;
use crate::exploit::{discover_exploits, Exploit};
use crate::extractor::FlagExtractor;
use crate::supervisor::{RunReport, RunSupervisor};

/// Pause after the server or the flag-id feed could not be reached.
pub const NETWORK_BACKOFF: Duration = Duration::from_secs(5);

/// Pause when the exploit directory holds nothing runnable.
pub const EMPTY_BACKOFF: Duration = Duration::from_secs(15);

/// How a single round ended.
#[derive(Debug)]
pub enum RoundOutcome {
    /// Every pair ran; the round counter advanced
    Completed { round: u64, runs: Vec<RunReport> },
    /// Nothing to run; slept [`EMPTY_BACKOFF`]
    Idle,
    /// Network trouble before any run started; slept [`NETWORK_BACKOFF`]
    Abandoned { reason: String },
}

/// Runs every exploit against every target, once per round.
pub struct ExploitScheduler {
    config: SchedulerConfig,
    server: ServerConfig,
    api: Arc<dyn WarehouseApi>,
    supervisor: RunSupervisor,
    rounds: AtomicU64,
    span: Span,
}

impl ExploitScheduler {
    /// Build a scheduler. Fails if the server's flag format does not compile.
    pub fn new(
        config: SchedulerConfig,
        server: ServerConfig,
        api: Arc<dyn WarehouseApi>,
        span: Span,
    ) -> Result<Self, RunnerError> {
        let extractor = FlagExtractor::new(&server.flag_format)?;
        let supervisor = RunSupervisor::new(extractor, api.clone());
        Ok(Self {
            config,
            server,
            api,
            supervisor,
            rounds: AtomicU64::new(0),
            span,
        })
    }

    /// Rounds completed so far.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Loop over rounds until `shutdown` resolves or a fatal error occurs.
    ///
    /// Resolving `shutdown` drops the current round, which kills every
    /// in-flight exploit process.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), RunnerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(parent: &self.span, "Caught interrupt. Bye!");
                    return Ok(());
                }
                outcome = self.run_round() => {
                    outcome?;
                }
            }
        }
    }

    /// Execute one round, including its pacing or backoff sleep.
    pub async fn run_round(&self) -> Result<RoundOutcome, RunnerError> {
        self.round_inner().instrument(self.span.clone()).await
    }

    async fn round_inner(&self) -> Result<RoundOutcome, RunnerError> {
        if let Err(e) = self.api.check_liveness().await {
            error!(error = %e, "Could not communicate with the server: retrying in 5 seconds.");
            tokio::time::sleep(NETWORK_BACKOFF).await;
            return Ok(RoundOutcome::Abandoned {
                reason: e.to_string(),
            });
        }
        let started = Instant::now();

        if let Some(url) = self.server.flag_ids_feed() {
            if let Err(e) = self
                .api
                .fetch_flag_ids(url, &self.config.flag_ids_path)
                .await
            {
                error!(error = %e, "{} failed: Retrying in 5 seconds.", url);
                tokio::time::sleep(NETWORK_BACKOFF).await;
                return Ok(RoundOutcome::Abandoned {
                    reason: e.to_string(),
                });
            }
        }

        let exploits = discover_exploits(&self.config.exploit_dir)?;
        let exploit_count = exploits.len();
        let work = self.plan(exploits);
        if work.is_empty() {
            if exploit_count == 0 {
                info!("No exploits found: retrying in 15 seconds");
            } else {
                info!("No teams to attack: retrying in 15 seconds");
            }
            tokio::time::sleep(EMPTY_BACKOFF).await;
            return Ok(RoundOutcome::Idle);
        }

        let round = self.rounds.load(Ordering::Relaxed) + 1;
        let workers = pool_size(self.config.max_workers, work.len());
        let timeout = self.server.run_timeout();

        obs::emit_round_started(round, exploit_count, self.server.targets().len(), workers);

        let runs: Vec<RunReport> = stream::iter(work)
            .map(|(exploit, target)| async move {
                self.supervisor.execute(&exploit, &target, timeout).await
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let elapsed = started.elapsed();
        obs::emit_round_finished(round, elapsed.as_millis() as u64, runs.len());
        self.rounds.store(round, Ordering::Relaxed);

        let round_duration = self.server.round_duration();
        if elapsed < round_duration {
            let remaining = round_duration - elapsed;
            debug!("Sleeping for {:.1} seconds", remaining.as_secs_f64());
            tokio::time::sleep(remaining).await;
        }

        Ok(RoundOutcome::Completed { round, runs })
    }

    /// Every (exploit, target) pair, exploits and targets each shuffled.
    fn plan(&self, mut exploits: Vec<Exploit>) -> Vec<(Exploit, String)> {
        let mut targets = self.server.targets().to_vec();
        let mut rng = rand::rng();
        exploits.shuffle(&mut rng);
        targets.shuffle(&mut rng);

        debug!(
            "Exploits: [{}]",
            exploits
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        exploits
            .into_iter()
            .flat_map(|exploit| {
                targets
                    .iter()
                    .map(move |target| (exploit.clone(), target.clone()))
            })
            .collect()
    }
}

/// Concurrency for a round: never more workers than pairs, never zero.
pub fn pool_size(max_workers: usize, pairs: usize) -> usize {
    max_workers.min(pairs).max(1)
}
