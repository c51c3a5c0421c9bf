use serde::{Deserialize, Serialize};

use crate::note::{EnhancedNote, TimedNote, Tuplet, TupletInfo};
use crate::{Error, Result};

/// A tick range under one tuplet, as reported by the tuplet detector.
///
/// The range is half-open: `start_tick` is inside, `end_tick` is not.
/// A span with `track` or `voice` set only claims notes of that stream;
/// an unscoped span claims every note whose onset it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupletSpan {
    pub start_tick: u64,
    pub end_tick: u64,
    pub tuplet: Tuplet,
    #[serde(default)]
    pub track: Option<usize>,
    #[serde(default)]
    pub voice: Option<u8>,
    /// Indices of member notes in the pipeline's note array
    #[serde(default)]
    pub note_indices: Vec<usize>,
}

impl TupletSpan {
    pub fn new(start_tick: u64, end_tick: u64, tuplet: Tuplet) -> Self {
        Self {
            start_tick,
            end_tick,
            tuplet,
            track: None,
            voice: None,
            note_indices: Vec::new(),
        }
    }

    /// Restrict the span to one (track, voice) stream.
    pub fn in_stream(mut self, track: usize, voice: u8) -> Self {
        self.track = Some(track);
        self.voice = Some(voice);
        self
    }

    pub fn contains_tick(&self, tick: u64) -> bool {
        self.start_tick <= tick && tick < self.end_tick
    }

    /// Whether `note` belongs to this span: onset inside, stream matching.
    pub fn claims(&self, note: &TimedNote) -> bool {
        self.contains_tick(note.start_tick)
            && self.track.map_or(true, |t| t == note.track)
            && self.voice.map_or(true, |v| v == note.voice)
    }

    /// Distinct onsets of claimed notes. Simultaneous notes count once.
    pub fn occupancy(&self, notes: &[EnhancedNote]) -> usize {
        let mut onsets: Vec<u64> = notes
            .iter()
            .filter(|n| self.claims(&n.note))
            .map(|n| n.note.start_tick)
            .collect();
        onsets.sort_unstable();
        onsets.dedup();
        onsets.len()
    }

    /// Fewer onsets than the tuplet type implies, e.g. a triplet holding two notes.
    pub fn is_partial(&self, notes: &[EnhancedNote]) -> bool {
        self.occupancy(notes) < self.tuplet.actual_notes as usize
    }
}

/// Index of the first span claiming `note`.
pub fn span_index_for_note(spans: &[TupletSpan], note: &TimedNote) -> Option<usize> {
    spans.iter().position(|s| s.claims(note))
}

fn check_spans(spans: &[TupletSpan]) -> Result<()> {
    for (i, span) in spans.iter().enumerate() {
        if span.end_tick <= span.start_tick {
            return Err(Error::FeatureProcessingFailed {
                phase: "tuplets",
                reason: format!(
                    "span {} has end tick {} not after start tick {}",
                    i, span.end_tick, span.start_tick
                ),
            });
        }
        if span.tuplet.actual_notes == 0 || span.tuplet.normal_notes == 0 {
            return Err(Error::FeatureProcessingFailed {
                phase: "tuplets",
                reason: format!(
                    "span {} has degenerate ratio {}:{}",
                    i, span.tuplet.actual_notes, span.tuplet.normal_notes
                ),
            });
        }
    }
    Ok(())
}

/// Attach detected tuplet spans to the notes they claim, rests included.
///
/// Rewrites each span's `note_indices` and sets `TupletInfo` on every
/// member, marking the first and last member of each span. Returns the
/// number of notes that received tuplet info.
pub fn attach_tuplets(notes: &mut [EnhancedNote], spans: &mut [TupletSpan]) -> Result<usize> {
    check_spans(spans)?;

    for span in spans.iter_mut() {
        span.note_indices.clear();
    }

    for (idx, note) in notes.iter().enumerate() {
        if let Some(span_idx) = span_index_for_note(spans, &note.note) {
            spans[span_idx].note_indices.push(idx);
        }
    }

    let mut attached = 0;
    for (span_index, span) in spans.iter().enumerate() {
        let last = span.note_indices.len().saturating_sub(1);
        for (pos, &idx) in span.note_indices.iter().enumerate() {
            notes[idx].tuplet = Some(TupletInfo {
                tuplet: span.tuplet,
                span_index,
                is_start: pos == 0,
                is_end: pos == last,
            });
            attached += 1;
        }
    }

    Ok(attached)
}
