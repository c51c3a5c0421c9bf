//! Rest consolidation.
//!
//! Runs of back-to-back rests in one voice are re-cut into fewer rests of
//! canonical length, each aligned to its own grid. A re-cut is only kept
//! when it is lossless: the new pieces must add up to exactly the ticks of
//! the fragments they replace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::PipelineMetrics;
use crate::note::{BeamState, EnhancedNote, RestData, RestInfo};

pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Canonical rest lengths as (quarters numerator, denominator, dotted),
/// longest first: whole, dotted half, half, dotted quarter, quarter,
/// eighth, sixteenth, 32nd.
const CANONICAL_LENGTHS: [(u64, u64, bool); 8] = [
    (4, 1, false),
    (3, 1, true),
    (2, 1, false),
    (3, 2, true),
    (1, 1, false),
    (1, 2, false),
    (1, 4, false),
    (1, 8, false),
];

/// One or more rest notes treated as a single notation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestSpan {
    pub start_tick: u64,
    pub end_tick: u64,
    pub note_indices: Vec<usize>,
    pub consolidated: bool,
}

/// (length, grid) pairs in ticks for the canonical lengths that divide
/// evenly at this resolution. A dotted length aligns to its undotted base.
fn canonical_values(ticks_per_quarter: u64) -> Vec<(u64, u64)> {
    CANONICAL_LENGTHS
        .iter()
        .filter(|(num, den, _)| (ticks_per_quarter * num) % den == 0)
        .map(|&(num, den, dotted)| {
            let len = ticks_per_quarter * num / den;
            let grid = if dotted { len / 3 * 2 } else { len };
            (len, grid)
        })
        .filter(|&(len, grid)| len > 0 && grid > 0)
        .collect()
}

/// Fit of a position to the beat grid: 1.0 on a beat, 0.75 on an
/// off-beat eighth, 0.5 on a sixteenth, 0.25 otherwise.
pub fn alignment_score(tick: u64, ticks_per_quarter: u64) -> f64 {
    if ticks_per_quarter == 0 {
        return 1.0;
    }
    let offset = tick % ticks_per_quarter;
    if offset == 0 {
        1.0
    } else if (offset * 2) % ticks_per_quarter == 0 {
        0.75
    } else if (offset * 4) % ticks_per_quarter == 0 {
        0.5
    } else {
        0.25
    }
}

/// Cut `[start, start + total)` into aligned canonical rests.
///
/// Each step consumes one unit of `budget`; returns `None` when the budget
/// runs out before the range is covered.
fn decompose(start: u64, total: u64, ticks_per_quarter: u64, budget: &mut usize) -> Option<Vec<RestData>> {
    let values = canonical_values(ticks_per_quarter);
    let smallest_grid = values.last().map_or(1, |&(_, grid)| grid);

    let mut pieces = Vec::new();
    let mut pos = start;
    let mut remaining = total;

    while remaining > 0 {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;

        let len = values
            .iter()
            .find(|&&(len, grid)| len <= remaining && pos % grid == 0)
            .map(|&(len, _)| len)
            // Off-grid: walk to the next point on the finest grid
            .unwrap_or_else(|| remaining.min(smallest_grid - pos % smallest_grid));

        pieces.push(RestData {
            start_tick: pos,
            duration_ticks: len,
        });
        pos += len;
        remaining -= len;
    }

    Some(pieces)
}

/// Runs of exactly contiguous rests per (track, voice), in array order.
///
/// A rest that is part of a beam ends the current run and is not itself
/// consolidated.
fn find_rest_runs(notes: &[EnhancedNote]) -> Vec<Vec<usize>> {
    let mut streams: BTreeMap<(usize, u8), Vec<usize>> = BTreeMap::new();
    for (idx, note) in notes.iter().enumerate() {
        if note.is_rest() {
            streams
                .entry((note.note.track, note.note.voice))
                .or_default()
                .push(idx);
        }
    }

    let mut runs = Vec::new();
    for indices in streams.into_values() {
        let mut run: Vec<usize> = Vec::new();
        for idx in indices {
            let beamed = notes[idx]
                .beam_state()
                .is_some_and(|state| state != BeamState::None);
            if beamed {
                if !run.is_empty() {
                    runs.push(std::mem::take(&mut run));
                }
                continue;
            }

            let contiguous = run
                .last()
                .is_some_and(|&prev| notes[prev].note.end_tick() == notes[idx].note.start_tick);
            if !contiguous && !run.is_empty() {
                runs.push(std::mem::take(&mut run));
            }
            run.push(idx);
        }
        if !run.is_empty() {
            runs.push(run);
        }
    }
    runs
}

/// Consolidate runs of rests into fewer, beat-aligned rests.
///
/// For an accepted run, the i-th fragment note carries the i-th new rest;
/// fragments beyond the new rest count are marked absorbed (`rest: None`).
/// Every touched note records its own original duration. Stops early,
/// keeping earlier results, once `max_iterations` consolidation steps
/// have been spent.
pub fn optimize_rests(
    notes: &mut [EnhancedNote],
    ticks_per_quarter: u32,
    max_iterations: usize,
    metrics: &mut PipelineMetrics,
) -> Vec<RestSpan> {
    let tpq = u64::from(ticks_per_quarter.max(1));
    let runs = find_rest_runs(notes);
    let mut budget = max_iterations;
    let mut spans = Vec::with_capacity(runs.len());

    metrics.rest_runs += runs.len();

    for run in runs {
        let start = notes[run[0]].note.start_tick;
        let total: u64 = run.iter().map(|&i| notes[i].note.duration_ticks).sum();
        let mut span = RestSpan {
            start_tick: start,
            end_tick: start.saturating_add(total),
            note_indices: run,
            consolidated: false,
        };

        if span.note_indices.len() < 2 || metrics.rest_iteration_limit_hit {
            spans.push(span);
            continue;
        }

        let Some(pieces) = decompose(start, total, tpq, &mut budget) else {
            metrics.rest_iteration_limit_hit = true;
            warn!(
                max_iterations,
                consolidated = spans.iter().filter(|s: &&RestSpan| s.consolidated).count(),
                "rest consolidation iteration limit reached, keeping partial results"
            );
            spans.push(span);
            continue;
        };

        let pieces_total: u64 = pieces.iter().map(|p| p.duration_ticks).sum();
        if pieces.len() >= span.note_indices.len() || pieces_total != total {
            metrics.rest_consolidations_rejected += 1;
            spans.push(span);
            continue;
        }

        for (pos, &idx) in span.note_indices.iter().enumerate() {
            let note = &mut notes[idx];
            let piece = pieces.get(pos).copied();
            let scored_at = piece.map_or(note.note.start_tick, |p| p.start_tick);
            note.rest = Some(RestInfo {
                rest: piece,
                is_optimized_rest: true,
                original_duration: note.note.duration_ticks,
                alignment_score: alignment_score(scored_at, tpq),
            });
            note.rest_processed = true;
        }

        span.consolidated = true;
        metrics.rest_spans_consolidated += 1;
        spans.push(span);
    }

    debug!(
        runs = spans.len(),
        consolidated = metrics.rest_spans_consolidated,
        rejected = metrics.rest_consolidations_rejected,
        "rest optimization complete"
    );
    spans
}
