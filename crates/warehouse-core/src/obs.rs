//! Structured observability hooks for scheduler and dispatcher lifecycles.
//!
//! This module provides:
//! - Component spans, created once and handed to the scheduler/dispatcher
//!   constructors so every log line they emit carries the component context
//! - Run-scoped spans via `run_span`
//! - Emission functions for round, run, discovery, batch and cycle events

use tracing::{info, warn, Span};

/// Build the logging context for a long-running component.
///
/// `component` names the engine ("scheduler", "dispatcher"), `instance`
/// identifies the operator or protocol it runs as.
pub fn component_span(component: &str, instance: &str) -> Span {
    tracing::info_span!("warehouse", component = %component, instance = %instance)
}

/// Span tagged with the run id, exploit and target, for instrumenting a run.
pub fn run_span(run_id: &str, exploit: &str, target: &str) -> Span {
    tracing::info_span!("run", run_id = %run_id, exploit = %exploit, target = %target)
}

/// Emit event: a scheduler round started.
pub fn emit_round_started(round: u64, exploits: usize, targets: usize, workers: usize) {
    info!(
        event = "round.started",
        round = round,
        exploits = exploits,
        targets = targets,
        workers = workers,
        "Starting new round. Running {} exploits.",
        exploits
    );
}

/// Emit event: a scheduler round finished.
pub fn emit_round_finished(round: u64, duration_ms: u64, runs: usize) {
    info!(
        event = "round.finished",
        round = round,
        duration_ms = duration_ms,
        runs = runs,
    );
}

/// Emit event: a run finished with a terminal classification.
pub fn emit_run_finished(run_id: &str, outcome: &str, duration_ms: u64, flags: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
        flags = flags,
    );
}

/// Emit event: flags extracted from one output line.
pub fn emit_flags_discovered(exploit: &str, target: &str, count: usize) {
    info!(
        event = "flags.discovered",
        exploit = %exploit,
        target = %target,
        count = count,
        "Got {} flags with {} from {}",
        count,
        exploit,
        target
    );
}

/// Emit event: a batch was resolved by the scoring oracle.
pub fn emit_batch_submitted(protocol: &str, size: usize, resolved: usize) {
    info!(
        event = "batch.submitted",
        protocol = %protocol,
        size = size,
        resolved = resolved,
    );
}

/// Emit event: a dispatcher cycle committed.
pub fn emit_cycle_finished(batches: usize, resolved: u64, expired: u64, duration_ms: u64) {
    info!(
        event = "cycle.finished",
        batches = batches,
        resolved = resolved,
        expired = expired,
        duration_ms = duration_ms,
    );
}

/// Emit event: a response token no vocabulary entry recognises.
pub fn emit_unrecognised_status(flag: &str, raw: &str) {
    warn!(event = "submit.unrecognised_status", flag = %flag, raw = %raw);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _guard = run_span("test-run-id", "exploit.py", "10.60.1.1").entered();
        emit_run_finished("test-run-id", "success", 12, 3);
    }

    #[test]
    fn test_component_span_is_usable_without_subscriber() {
        let span = component_span("dispatcher", "dummy");
        let _guard = span.enter();
        emit_cycle_finished(1, 2, 3, 4);
    }
}
