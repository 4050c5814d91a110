//! Metrics instrumentation for hamip-sync.
//!
//! All metrics are prefixed with `hamip_sync.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

use crate::sync::Phase;

/// Record the number of entries fetched from the registry.
pub fn record_registry_entries(kind: &str, count: usize) {
    gauge!("hamip_sync.registry.entries", "kind" => kind.to_string()).set(count as f64);
}

/// Record the size of the derived desired state.
pub fn record_derived_records(count: usize) {
    gauge!("hamip_sync.derived.records").set(count as f64);
}

/// Record the change set computed for a zone.
pub fn record_changes(zone: &str, removals: usize, replacements: usize) {
    gauge!("hamip_sync.changes", "zone" => zone.to_string(), "kind" => "removal")
        .set(removals as f64);
    gauge!("hamip_sync.changes", "zone" => zone.to_string(), "kind" => "replacement")
        .set(replacements as f64);
}

/// Record entries dropped by the change cap.
pub fn record_truncation(kind: &'static str, dropped: usize) {
    counter!("hamip_sync.changes.truncated.count", "kind" => kind).increment(dropped as u64);
}

/// Batch outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum BatchOutcome {
    /// Accepted with the expected status.
    Applied,
    /// Answered with an unexpected status.
    Rejected,
    /// No response (transport error).
    Failed,
}

/// Record a patch batch.
pub fn record_batch(zone: &str, phase: Phase, outcome: BatchOutcome, operations: usize) {
    let outcome_str = match outcome {
        BatchOutcome::Applied => "applied",
        BatchOutcome::Rejected => "rejected",
        BatchOutcome::Failed => "failed",
    };

    counter!(
        "hamip_sync.batch.count",
        "zone" => zone.to_string(),
        "phase" => phase.as_str(),
        "outcome" => outcome_str
    )
    .increment(1);
    if matches!(outcome, BatchOutcome::Applied) {
        counter!("hamip_sync.batch.operations", "zone" => zone.to_string(), "phase" => phase.as_str())
            .increment(operations as u64);
    }
}

/// Run outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome {
    /// Reached DONE.
    Done,
    /// Stopped during the given phase.
    Failed(Phase),
}

/// Record a finished zone run.
pub fn record_run(zone: &str, outcome: RunOutcome, duration: std::time::Duration) {
    let (outcome_str, phase) = match outcome {
        RunOutcome::Done => ("done", Phase::Done),
        RunOutcome::Failed(phase) => ("failed", phase),
    };

    counter!(
        "hamip_sync.run.count",
        "zone" => zone.to_string(),
        "outcome" => outcome_str,
        "phase" => phase.as_str()
    )
    .increment(1);
    histogram!("hamip_sync.run.duration.seconds", "zone" => zone.to_string())
        .record(duration.as_secs_f64());
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
