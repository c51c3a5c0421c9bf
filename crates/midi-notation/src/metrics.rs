//! Metrics threaded through every phase and handed back to the caller.
//!
//! Nothing here is global: the orchestrator owns one [`PipelineMetrics`]
//! and passes it by `&mut` into each phase.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coordinate::CoordinationReport;

/// Timing and volume for one phase run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: String,
    pub notes_processed: usize,
    pub conflicts_resolved: usize,
    pub elapsed_ns: u64,
}

/// Everything the pipeline reports about one conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub phases: Vec<PhaseMetrics>,

    // Tuplets
    pub tuplet_spans: usize,
    pub tuplet_notes: usize,
    pub partial_tuplets: usize,

    // Beams
    pub beam_groups: usize,
    pub beamed_notes: usize,
    pub beam_splits: usize,
    pub tuplet_beams_cleared: usize,
    pub tuplet_boundary_crossings: usize,

    // Rests
    pub rest_runs: usize,
    pub rest_spans_consolidated: usize,
    pub rest_consolidations_rejected: usize,
    pub rest_iteration_limit_hit: bool,

    pub coordination: CoordinationReport,

    /// Phases that failed and were replaced by unannotated output
    pub degraded_phases: Vec<String>,

    pub total_elapsed_ns: u64,
    pub ns_per_note: f64,
    pub performance_target_exceeded: bool,
}

impl PipelineMetrics {
    /// Record a finished phase.
    pub fn record_phase(
        &mut self,
        phase: &str,
        notes_processed: usize,
        conflicts_resolved: usize,
        elapsed: Duration,
    ) {
        let elapsed_ns = duration_ns(elapsed);
        debug!(
            phase,
            notes = notes_processed,
            conflicts = conflicts_resolved,
            elapsed_ns,
            "phase complete"
        );
        self.phases.push(PhaseMetrics {
            phase: phase.to_string(),
            notes_processed,
            conflicts_resolved,
            elapsed_ns,
        });
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseMetrics> {
        self.phases.iter().find(|p| p.phase == name)
    }

    /// Total conflicts resolved across all phases.
    pub fn conflicts_resolved(&self) -> usize {
        self.phases.iter().map(|p| p.conflicts_resolved).sum()
    }

    /// Close out the run: total time, per-note cost, and the budget check.
    ///
    /// Going over budget only sets a flag and logs a warning.
    pub fn finish(&mut self, note_count: usize, elapsed: Duration, target_ns_per_note: u64) {
        self.total_elapsed_ns = duration_ns(elapsed);
        self.ns_per_note = if note_count > 0 {
            self.total_elapsed_ns as f64 / note_count as f64
        } else {
            0.0
        };

        if note_count > 0 && self.ns_per_note > target_ns_per_note as f64 {
            self.performance_target_exceeded = true;
            warn!(
                ns_per_note = self.ns_per_note,
                target_ns_per_note, "performance target exceeded"
            );
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Wall-clock timer for one phase.
pub(crate) struct PhaseTimer {
    started: Instant,
}

impl PhaseTimer {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
