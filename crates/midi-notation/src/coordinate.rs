//! Cross-feature conflict resolution and invariant checks.
//!
//! Conflicts between annotations are expected runtime states, not errors.
//! [`coordinate`] resolves each one the same way every time, so running it
//! again over its own output finds nothing left to do.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chord::{ChordGroup, MAX_CHORD_SPAN};
use crate::note::{BeamState, EnhancedNote};

/// Annotation counts and conflicts resolved by one coordination pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationReport {
    pub notes_processed: usize,
    pub tuplet_notes: usize,
    pub beamed_notes: usize,
    pub rest_notes: usize,
    pub dynamics_notes: usize,
    pub rest_dynamics_conflicts: usize,
    pub rest_beam_conflicts: usize,
    pub tuplet_beam_conflicts: usize,
}

impl CoordinationReport {
    pub fn conflicts_resolved(&self) -> usize {
        self.rest_dynamics_conflicts + self.rest_beam_conflicts + self.tuplet_beam_conflicts
    }
}

/// Resolve remaining annotation conflicts in one pass.
///
/// Priority per note:
/// 1. a rest carrying dynamics loses the dynamics
/// 2. a note with both rest info and beaming loses the rest info
/// 3. a note with both tuplet info and beaming loses the beaming
///
/// Annotation counts are taken after resolution.
pub fn coordinate(notes: &mut [EnhancedNote]) -> CoordinationReport {
    let mut report = CoordinationReport {
        notes_processed: notes.len(),
        ..Default::default()
    };

    for note in notes.iter_mut() {
        if note.is_rest() && note.dynamics.is_some() {
            note.dynamics = None;
            report.rest_dynamics_conflicts += 1;
        }

        if note.rest.is_some() && note.beaming.is_some() {
            note.rest = None;
            note.rest_processed = false;
            report.rest_beam_conflicts += 1;
        }

        if note.tuplet.is_some() && note.beaming.is_some() {
            note.beaming = None;
            report.tuplet_beam_conflicts += 1;
        }

        report.tuplet_notes += usize::from(note.tuplet.is_some());
        report.beamed_notes += usize::from(note.beaming.is_some());
        report.rest_notes += usize::from(note.rest.is_some());
        report.dynamics_notes += usize::from(note.dynamics.is_some());
    }

    debug!(
        notes = report.notes_processed,
        conflicts = report.conflicts_resolved(),
        "coordination complete"
    );
    report
}

/// Invariant violations found in finished output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rest_beam_overlaps: usize,
    pub tuplet_beam_overlaps: usize,
    pub rest_dynamics_overlaps: usize,
    /// Beam groups whose states are not `Begin, Continue*, End`, plus
    /// single-note groups left holding a dangling `End`
    pub malformed_beam_groups: usize,
    pub invalid_chords: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        *self == ValidationReport::default()
    }
}

fn is_well_formed_beam(states: &[BeamState]) -> bool {
    match states {
        [] => true,
        [only] => *only != BeamState::End,
        [first, middle @ .., last] => {
            *first == BeamState::Begin
                && *last == BeamState::End
                && middle.iter().all(|s| *s == BeamState::Continue)
        }
    }
}

fn is_valid_chord(chord: &ChordGroup) -> bool {
    let ascending = chord.notes.windows(2).all(|w| w[0].pitch < w[1].pitch);
    let span_ok = match (chord.notes.first(), chord.notes.last()) {
        (Some(lo), Some(hi)) => hi.pitch.abs_diff(lo.pitch) <= MAX_CHORD_SPAN,
        _ => true,
    };
    ascending && span_ok
}

/// Check the output invariants over notes and chords.
///
/// Beam groups are read back from `beam_group_id`. A one-note group may
/// carry any state but `End`.
pub fn validate(notes: &[EnhancedNote], chords: &[ChordGroup]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut groups: BTreeMap<u32, Vec<BeamState>> = BTreeMap::new();

    for note in notes {
        if note.rest.is_some() && note.beaming.is_some() {
            report.rest_beam_overlaps += 1;
        }
        if note.tuplet.is_some() && note.beaming.is_some() {
            report.tuplet_beam_overlaps += 1;
        }
        if note.is_rest() && note.dynamics.is_some() {
            report.rest_dynamics_overlaps += 1;
        }
        if let Some(beaming) = &note.beaming {
            if let Some(id) = beaming.beam_group_id {
                groups.entry(id).or_default().push(beaming.state);
            }
        }
    }

    report.malformed_beam_groups = groups
        .values()
        .filter(|states| !is_well_formed_beam(states))
        .count();
    report.invalid_chords = chords.iter().filter(|c| !is_valid_chord(c)).count();

    report
}
