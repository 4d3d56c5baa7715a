//! The submission loop.
//!
//! One cycle per interval:
//! 1. refill the backlog with pending, unexpired flags (newest first)
//! 2. form at most `requests_per_interval` batches of `batch_size`
//! 3. submit each batch, stopping early on a network failure or empty reply
//! 4. map reply tokens to outcomes
//! 5. expire pending flags older than the lifetime
//! 6. commit 4 and 5 as one unit
//! 7. sleep out the interval

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};
use warehouse_core::obs;
use warehouse_state::{CycleUpdate, FlagStore};

use crate::backlog::BacklogQueue;
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::submitter::{build_submitter, RawVerdict, Submitter};
use crate::vocabulary::{BatchTally, Verdict};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Batches handed to the submitter
    pub batches: usize,
    /// Flags handed to the submitter
    pub submitted: usize,
    /// Rows that received an outcome from a reply
    pub resolved: u64,
    /// Rows aged out by the sweep
    pub expired: u64,
    /// The submitter returned nothing usable; wait a full interval
    pub backoff: bool,
}

/// Drives a [`Submitter`] from the flag store.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn FlagStore>,
    submitter: Box<dyn Submitter>,
    backlog: BacklogQueue,
    span: Span,
}

impl Dispatcher {
    /// Build a dispatcher with the submitter named in `config.protocol`.
    ///
    /// An unknown protocol or unusable endpoint fails here, before any
    /// warm-up or cycle.
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn FlagStore>,
        span: Span,
    ) -> Result<Self, DispatchError> {
        let submitter = build_submitter(&config)?;
        Ok(Self::with_submitter(config, store, submitter, span))
    }

    pub fn with_submitter(
        config: DispatcherConfig,
        store: Arc<dyn FlagStore>,
        submitter: Box<dyn Submitter>,
        span: Span,
    ) -> Self {
        Self {
            config,
            store,
            submitter,
            backlog: BacklogQueue::new(),
            span,
        }
    }

    pub fn backlog(&self) -> &BacklogQueue {
        &self.backlog
    }

    /// Warm up, then run cycles until `shutdown` resolves.
    ///
    /// Cycle failures are logged and followed by a full interval; they never
    /// end the loop.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let span = self.span.clone();
        let interval = self.config.interval();

        let work = async {
            tokio::time::sleep(self.config.warmup()).await;
            info!(protocol = self.submitter.name(), "starting.");

            loop {
                let started = Instant::now();
                let wait = match self.run_cycle().await {
                    Ok(summary) if summary.backoff => interval,
                    Ok(_) => interval.saturating_sub(started.elapsed()),
                    Err(e) => {
                        error!(error = %e, "Submission cycle failed");
                        interval
                    }
                };
                if wait > Duration::ZERO {
                    tokio::time::sleep(wait).await;
                }
            }
        };

        tokio::select! {
            _ = &mut shutdown => info!(parent: &span, "Dispatcher stopped"),
            _ = work.instrument(span.clone()) => {}
        }
    }

    /// Run one cycle without the pacing sleep.
    pub async fn run_cycle(&self) -> Result<CycleSummary, DispatchError> {
        let started = Instant::now();
        let cutoff = chrono::Duration::from_std(self.config.flag_lifetime())
            .ok()
            .and_then(|lifetime| Utc::now().checked_sub_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        // Leftovers from earlier cycles may have aged out or been resolved.
        self.backlog.clear();
        // Selected newest first; enqueue oldest first so the stack pops the newest.
        for value in self.store.select_pending(cutoff).await?.into_iter().rev() {
            self.backlog.put(value);
        }

        let mut update = CycleUpdate::new(cutoff);
        let mut summary = CycleSummary::default();
        let max_batches = (self.config.requests_per_interval as usize).min(self.backlog.len());

        while summary.batches < max_batches {
            let batch = self.backlog.drain_batch(self.config.batch_size.max(1));
            if batch.is_empty() {
                break;
            }
            summary.batches += 1;
            summary.submitted += batch.len();

            match self.submitter.submit(&batch).await {
                Ok(verdicts) if verdicts.is_empty() => {
                    warn!("Nothing submitted this cycle, waiting a full interval");
                    summary.backoff = true;
                    break;
                }
                Ok(verdicts) => {
                    let tally = self.reconcile(&batch, &verdicts, &mut update);
                    info!("{}", tally);
                    obs::emit_batch_submitted(self.submitter.name(), batch.len(), tally.resolved());
                }
                Err(e) => {
                    warn!(error = %e, "Could not send the flags to the server, retrying...");
                    break;
                }
            }
        }

        let report = self.store.apply_cycle(update).await?;
        summary.resolved = report.resolved;
        summary.expired = report.expired;

        obs::emit_cycle_finished(
            summary.batches,
            report.resolved,
            report.expired,
            started.elapsed().as_millis() as u64,
        );
        Ok(summary)
    }

    fn reconcile(
        &self,
        batch: &[String],
        verdicts: &[RawVerdict],
        update: &mut CycleUpdate,
    ) -> BatchTally {
        let vocabulary = self.submitter.vocabulary();
        let mut tally = BatchTally::new(batch.len());

        for raw in verdicts {
            let verdict = vocabulary.classify(&raw.status);
            tally.record(verdict);
            match verdict.map(|v| (v, v.outcome())) {
                Some((_, Some(outcome))) => update.resolve(raw.flag.as_str(), outcome),
                Some((Verdict::Unavailable, None)) => {
                    debug!(flag = %raw.flag, status = %raw.status, "Flag not available yet")
                }
                _ => obs::emit_unrecognised_status(&raw.flag, &raw.status),
            }
        }
        tally
    }
}
