use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::note::TimedNote;

/// Largest provisional group that can still be accepted as one chord.
pub const MAX_CHORD_SIZE: usize = 8;

/// Widest pitch span (semitones) a single chord may cover.
pub const MAX_CHORD_SPAN: u8 = 24;

/// Notes below middle C put a chord on the bass staff.
pub const MIDDLE_C: u8 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staff {
    Treble,
    Bass,
}

impl Staff {
    /// Staff for a set of pitches: any pitch below middle C selects the bass staff.
    pub fn for_pitches(mut pitches: impl Iterator<Item = u8>) -> Staff {
        if pitches.any(|p| p < MIDDLE_C) {
            Staff::Bass
        } else {
            Staff::Treble
        }
    }

    /// MusicXML `<staff>` number
    pub fn number(&self) -> u8 {
        match self {
            Staff::Treble => 1,
            Staff::Bass => 2,
        }
    }
}

/// Notes that sound together and are notated as one chord.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordGroup {
    pub start_tick: u64,
    /// Member notes, ascending by pitch
    pub notes: Vec<TimedNote>,
    pub staff: Staff,
    /// Distinct source tracks, ascending
    pub tracks_involved: Vec<usize>,
    pub is_cross_track: bool,
}

impl ChordGroup {
    fn from_notes(mut notes: Vec<TimedNote>) -> Self {
        notes.sort_by_key(|n| n.pitch);
        let start_tick = notes.iter().map(|n| n.start_tick).min().unwrap_or(0);
        let staff = Staff::for_pitches(notes.iter().map(|n| n.pitch));
        let tracks_involved = distinct_tracks(&notes);
        let is_cross_track = tracks_involved.len() > 1;

        Self {
            start_tick,
            notes,
            staff,
            tracks_involved,
            is_cross_track,
        }
    }

    fn singleton(note: TimedNote) -> Self {
        Self::from_notes(vec![note])
    }

    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    pub fn is_chord(&self) -> bool {
        self.notes.len() > 1
    }
}

fn distinct_tracks(notes: &[TimedNote]) -> Vec<usize> {
    let mut tracks: Vec<usize> = notes.iter().map(|n| n.track).collect();
    tracks.sort_unstable();
    tracks.dedup();
    tracks
}

/// Borrow the notes when already in onset order, otherwise sort a copy.
fn sorted_by_onset(notes: &[TimedNote]) -> Cow<'_, [TimedNote]> {
    if notes.windows(2).all(|w| w[0].start_tick <= w[1].start_tick) {
        Cow::Borrowed(notes)
    } else {
        let mut sorted = notes.to_vec();
        sorted.sort_by_key(|n| n.start_tick);
        Cow::Owned(sorted)
    }
}

/// Provisional groups over onset-sorted notes.
///
/// The first unconsumed note anchors each window; later notes join while
/// their onset is within `tolerance` of the anchor. The window never slides.
struct AnchoredWindows<'a> {
    notes: &'a [TimedNote],
    tolerance: u64,
    next: usize,
}

impl<'a> Iterator for AnchoredWindows<'a> {
    type Item = &'a [TimedNote];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next;
        let anchor = self.notes.get(start)?;
        let limit = anchor.start_tick.saturating_add(self.tolerance);

        let mut end = start + 1;
        while end < self.notes.len() && self.notes[end].start_tick <= limit {
            end += 1;
        }
        self.next = end;
        Some(&self.notes[start..end])
    }
}

fn anchored_windows(notes: &[TimedNote], tolerance: u64) -> AnchoredWindows<'_> {
    AnchoredWindows {
        notes,
        tolerance,
        next: 0,
    }
}

/// Whether a provisional group of 2..=8 notes may be emitted as one chord.
fn is_valid_chord(group: &[TimedNote]) -> bool {
    if group.len() < 2 || group.len() > MAX_CHORD_SIZE {
        return false;
    }

    let mut seen = [false; 256];
    for note in group {
        let slot = &mut seen[note.pitch as usize];
        if *slot {
            return false;
        }
        *slot = true;
    }

    let min = group.iter().map(|n| n.pitch).min().unwrap_or(0);
    let max = group.iter().map(|n| n.pitch).max().unwrap_or(0);
    max - min <= MAX_CHORD_SPAN
}

/// Group simultaneous notes into chords.
///
/// `tolerance_ticks` of 0 requires identical onsets. Groups that fail
/// validation (duplicate pitch, span over two octaves, more than eight
/// notes) are split into one singleton group per note, so the output
/// always holds exactly as many notes as the input.
pub fn detect_chords(notes: &[TimedNote], tolerance_ticks: u64) -> Vec<ChordGroup> {
    let sorted = sorted_by_onset(notes);
    let mut groups = Vec::with_capacity(sorted.len());
    let mut decomposed = 0usize;

    for window in anchored_windows(&sorted, tolerance_ticks) {
        if window.len() == 1 {
            groups.push(ChordGroup::singleton(window[0]));
        } else if is_valid_chord(window) {
            groups.push(ChordGroup::from_notes(window.to_vec()));
        } else {
            decomposed += 1;
            groups.extend(window.iter().copied().map(ChordGroup::singleton));
        }
    }

    debug!(
        notes = notes.len(),
        groups = groups.len(),
        decomposed,
        "chord detection complete"
    );
    groups
}

/// Find chords whose notes come from two or more tracks.
///
/// Windowing and validation match [`detect_chords`]; groups drawn from a
/// single track and singletons are left to the same-track detector and
/// not emitted here.
pub fn detect_cross_track_chords(notes: &[TimedNote], tolerance_ticks: u64) -> Vec<ChordGroup> {
    let sorted = sorted_by_onset(notes);

    anchored_windows(&sorted, tolerance_ticks)
        .filter(|window| is_valid_chord(window))
        .map(|window| ChordGroup::from_notes(window.to_vec()))
        .filter(|group| group.is_cross_track)
        .collect()
}
