//! The annotation pipeline: runs every phase in order over one note array.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use notation_conf::NotationConfig;

use crate::beam::{coordinate_beam_groups, coordinate_beams, gap_threshold_for, BeamGroupInfo};
use crate::chord::{detect_chords, detect_cross_track_chords, ChordGroup};
use crate::coordinate::coordinate;
use crate::metrics::{PhaseTimer, PipelineMetrics};
use crate::note::{DynamicsInfo, EnhancedNote, TimedNote};
use crate::rest::{optimize_rests, RestSpan};
use crate::stem::assign_stems;
use crate::tuplet::{attach_tuplets, TupletSpan};
use crate::{try_reserve, Error, Result};

/// Parsed notes plus the hints produced by upstream detectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineInput {
    pub notes: Vec<TimedNote>,
    #[serde(default)]
    pub tuplet_spans: Vec<TupletSpan>,
    /// Empty, or one entry per note in input order
    #[serde(default)]
    pub dynamics: Vec<Option<DynamicsInfo>>,
    /// Beam groups proposed upstream, indexed by input order. When absent
    /// the pipeline proposes groups itself.
    #[serde(default)]
    pub beam_groups: Option<Vec<BeamGroupInfo>>,
}

impl PipelineInput {
    pub fn from_notes(notes: Vec<TimedNote>) -> Self {
        Self {
            notes,
            ..Default::default()
        }
    }
}

/// Pipeline output, ready for a notation serializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedScore {
    /// Annotated notes sorted by (start tick, track, voice, pitch)
    pub notes: Vec<EnhancedNote>,
    pub tuplet_spans: Vec<TupletSpan>,
    pub beam_groups: Vec<BeamGroupInfo>,
    pub rest_spans: Vec<RestSpan>,
    pub chords: Vec<ChordGroup>,
    pub cross_track_chords: Vec<ChordGroup>,
    pub metrics: PipelineMetrics,
}

/// Turn a failed phase into a degraded one when fallback is enabled.
///
/// Only `FeatureProcessingFailed` is recoverable. The caller strips the
/// phase's annotations after this returns `Ok`.
fn degrade(err: Error, config: &NotationConfig, metrics: &mut PipelineMetrics) -> Result<()> {
    match err {
        Error::FeatureProcessingFailed { phase, reason } if config.features.performance_fallback => {
            warn!(phase, %reason, "phase failed, continuing without its annotations");
            metrics.degraded_phases.push(phase.to_string());
            Ok(())
        }
        err => Err(err),
    }
}

/// Map upstream beam proposals from input order onto sorted positions.
fn remap_beam_groups(
    groups: Vec<BeamGroupInfo>,
    sorted_position: &[usize],
    notes: &[EnhancedNote],
) -> Result<Vec<BeamGroupInfo>> {
    groups
        .into_iter()
        .map(|mut group| {
            for idx in group.note_indices.iter_mut() {
                *idx = *sorted_position.get(*idx).ok_or_else(|| Error::FeatureProcessingFailed {
                    phase: "beaming",
                    reason: format!(
                        "beam group {} references note {} but only {} notes exist",
                        group.group_id,
                        idx,
                        sorted_position.len()
                    ),
                })?;
            }
            group.note_indices.sort_unstable();
            group.note_indices.dedup();
            group.refresh_bounds(notes);
            Ok(group)
        })
        .collect()
}

/// Annotate a note stream for notation.
///
/// Phases run strictly in order: tuplets, beaming, rests, dynamics,
/// coordination, stems, then chord detection over the sounding notes.
/// Tuplets, beaming and rest optimization can be switched off in `config`;
/// coordination and stems always run.
///
/// # Errors
///
/// - [`Error::InvalidConfiguration`] before any phase runs
/// - [`Error::Allocation`] when the note array cannot be reserved
/// - [`Error::FeatureProcessingFailed`] when a phase's inputs are unusable
///   and `performance_fallback` is off
pub fn annotate(input: PipelineInput, config: &NotationConfig) -> Result<AnnotatedScore> {
    config.validate()?;

    let total = PhaseTimer::start();
    let mut metrics = PipelineMetrics::default();
    let tpq = config.timing.ticks_per_quarter;

    let PipelineInput {
        notes: input_notes,
        mut tuplet_spans,
        mut dynamics,
        beam_groups: proposed_beams,
    } = input;

    if !dynamics.is_empty() && dynamics.len() != input_notes.len() {
        degrade(
            Error::FeatureProcessingFailed {
                phase: "dynamics",
                reason: format!(
                    "{} dynamics entries for {} notes",
                    dynamics.len(),
                    input_notes.len()
                ),
            },
            config,
            &mut metrics,
        )?;
        dynamics.clear();
    }

    // Stable sort so equal keys keep input order
    let mut order: Vec<usize> = Vec::new();
    try_reserve(&mut order, input_notes.len(), "sort order")?;
    order.extend(0..input_notes.len());
    order.sort_by_key(|&i| {
        let n = &input_notes[i];
        (n.start_tick, n.track, n.voice, n.pitch)
    });

    let mut sorted_position = vec![0; input_notes.len()];
    let mut notes: Vec<EnhancedNote> = Vec::new();
    try_reserve(&mut notes, input_notes.len(), "note array")?;
    for (pos, &i) in order.iter().enumerate() {
        sorted_position[i] = pos;
        let mut note = EnhancedNote::new(input_notes[i]);
        note.dynamics = dynamics.get_mut(i).and_then(Option::take);
        notes.push(note);
    }
    drop(order);

    // Tuplets
    let timer = PhaseTimer::start();
    if config.features.tuplets {
        match attach_tuplets(&mut notes, &mut tuplet_spans) {
            Ok(attached) => {
                metrics.tuplet_spans = tuplet_spans.len();
                metrics.tuplet_notes = attached;
            }
            Err(err) => {
                degrade(err, config, &mut metrics)?;
                notes.iter_mut().for_each(|n| n.tuplet = None);
                tuplet_spans.clear();
            }
        }
    } else {
        tuplet_spans.clear();
    }
    metrics.record_phase("tuplets", notes.len(), 0, timer.elapsed());

    // Beaming
    let timer = PhaseTimer::start();
    let mut beam_groups = Vec::new();
    if config.features.beaming {
        let gap = config
            .beaming
            .gap_threshold_ticks
            .unwrap_or_else(|| gap_threshold_for(tpq));
        let result = match proposed_beams {
            Some(groups) => remap_beam_groups(groups, &sorted_position, &notes).and_then(|groups| {
                coordinate_beam_groups(&mut notes, groups, &tuplet_spans, tpq, gap, &mut metrics)
            }),
            None => coordinate_beams(&mut notes, &tuplet_spans, tpq, gap, &mut metrics),
        };
        match result {
            Ok(groups) => beam_groups = groups,
            Err(err) => {
                degrade(err, config, &mut metrics)?;
                notes.iter_mut().for_each(|n| n.beaming = None);
            }
        }
    }
    let beam_conflicts = metrics.tuplet_beams_cleared + metrics.beam_splits;
    metrics.record_phase("beaming", notes.len(), beam_conflicts, timer.elapsed());

    // Rests
    let timer = PhaseTimer::start();
    let rest_spans = if config.features.rest_optimization {
        optimize_rests(&mut notes, tpq, config.rests.max_iterations, &mut metrics)
    } else {
        Vec::new()
    };
    let rest_notes = rest_spans.iter().map(|s| s.note_indices.len()).sum();
    metrics.record_phase("rests", rest_notes, 0, timer.elapsed());

    // Dynamics arrive attached; only count them here
    let timer = PhaseTimer::start();
    let with_dynamics = notes.iter().filter(|n| n.dynamics.is_some()).count();
    metrics.record_phase("dynamics", with_dynamics, 0, timer.elapsed());

    let timer = PhaseTimer::start();
    let report = coordinate(&mut notes);
    metrics.record_phase(
        "coordination",
        report.notes_processed,
        report.conflicts_resolved(),
        timer.elapsed(),
    );
    metrics.coordination = report;

    let timer = PhaseTimer::start();
    let stems = assign_stems(&mut notes);
    metrics.record_phase("stems", stems, 0, timer.elapsed());

    let timer = PhaseTimer::start();
    let mut sounding: Vec<TimedNote> = Vec::new();
    try_reserve(&mut sounding, notes.len(), "chord input")?;
    sounding.extend(notes.iter().filter(|n| !n.is_rest()).map(|n| n.note));
    let chords = detect_chords(&sounding, config.chords.tolerance_ticks);
    let cross_track_chords = detect_cross_track_chords(&sounding, config.chords.tolerance_ticks);
    metrics.record_phase("chords", sounding.len(), 0, timer.elapsed());

    metrics.finish(
        notes.len(),
        total.elapsed(),
        config.performance.target_ns_per_note,
    );

    let largest_chord = chords.iter().map(|c| c.notes.len()).max().unwrap_or(0);
    info!(
        notes = notes.len(),
        chords = chords.iter().filter(|c| c.is_chord()).count(),
        largest_chord,
        beam_groups = beam_groups.len(),
        conflicts = metrics.conflicts_resolved(),
        degraded = metrics.degraded_phases.len(),
        ns_per_note = metrics.ns_per_note,
        "annotation complete"
    );

    Ok(AnnotatedScore {
        notes,
        tuplet_spans,
        beam_groups,
        rest_spans,
        chords,
        cross_track_chords,
        metrics,
    })
}
