//! Stem direction per note, shared across beam groups.

use std::collections::BTreeMap;

use tracing::debug;

use crate::chord::MIDDLE_C;
use crate::note::{EnhancedNote, StemDirection};

/// Middle staff line of the treble staff (B4).
pub const TREBLE_MIDDLE_LINE: u8 = 71;

/// Middle staff line of the bass staff (D3).
pub const BASS_MIDDLE_LINE: u8 = 50;

/// Direction for a note sitting exactly on its middle line, indexed by `voice % 2`.
///
/// Even voices stem up and odd voices stem down. Pinned to reference output
/// rather than derived; change only against new golden files.
pub const MIDDLE_LINE_TIE_BREAK: [StemDirection; 2] = [StemDirection::Up, StemDirection::Down];

fn middle_line(pitch: u8) -> u8 {
    if pitch < MIDDLE_C {
        BASS_MIDDLE_LINE
    } else {
        TREBLE_MIDDLE_LINE
    }
}

/// Semitones above (positive) or below (negative) the note's middle line.
fn offset(note: &EnhancedNote) -> i16 {
    let pitch = note.note.pitch;
    i16::from(pitch) - i16::from(middle_line(pitch))
}

fn tie_break(voice: u8) -> StemDirection {
    MIDDLE_LINE_TIE_BREAK[usize::from(voice % 2)]
}

/// Direction of a note taken alone.
pub fn stem_for(note: &EnhancedNote) -> StemDirection {
    match offset(note) {
        d if d > 0 => StemDirection::Down,
        d if d < 0 => StemDirection::Up,
        _ => tie_break(note.note.voice),
    }
}

/// Shared direction for a beam group.
///
/// The member farthest from its middle line decides. When equally distant
/// extremes point opposite ways, or every member sits on the line, the
/// per-note majority decides; an even split falls back to the first
/// member's tie-break.
fn group_stem(notes: &[EnhancedNote], members: &[usize]) -> Option<StemDirection> {
    let first = notes.get(*members.first()?)?;

    let max_distance = members.iter().map(|&i| offset(&notes[i]).abs()).max()?;
    if max_distance > 0 {
        let extremes = members
            .iter()
            .map(|&i| offset(&notes[i]))
            .filter(|d| d.abs() == max_distance);
        let (above, below) = extremes.fold((false, false), |(a, b), d| (a || d > 0, b || d < 0));
        match (above, below) {
            (true, false) => return Some(StemDirection::Down),
            (false, true) => return Some(StemDirection::Up),
            _ => {}
        }
    }

    let down = members
        .iter()
        .filter(|&&i| stem_for(&notes[i]) == StemDirection::Down)
        .count();
    let up = members.len() - down;
    Some(match down.cmp(&up) {
        std::cmp::Ordering::Greater => StemDirection::Down,
        std::cmp::Ordering::Less => StemDirection::Up,
        std::cmp::Ordering::Equal => tie_break(first.note.voice),
    })
}

/// Set `stem` on every note. Rests get `None`.
///
/// Sounding notes whose `BeamingInfo` carries a group id take the group's
/// shared direction; all others are decided per note.
pub fn assign_stems(notes: &mut [EnhancedNote]) -> usize {
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();

    for (idx, note) in notes.iter_mut().enumerate() {
        if note.is_rest() {
            note.stem = None;
            continue;
        }
        match note.beam_group_id() {
            Some(id) => groups.entry(id).or_default().push(idx),
            None => note.stem = Some(stem_for(note)),
        }
    }

    for members in groups.values() {
        let shared = group_stem(notes, members);
        for &idx in members {
            notes[idx].stem = shared;
        }
    }

    let assigned = notes.iter().filter(|n| n.stem.is_some()).count();
    debug!(assigned, beam_groups = groups.len(), "stems assigned");
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::{BeamState, BeamingInfo, TimedNote};

    fn make_note(pitch: u8, voice: u8) -> EnhancedNote {
        EnhancedNote::new(TimedNote {
            pitch,
            channel: 0,
            velocity: if pitch == 0 { 0 } else { 80 },
            start_tick: 0,
            duration_ticks: 240,
            tie_start: false,
            tie_stop: false,
            track: 0,
            voice,
        })
    }

    fn in_group(mut note: EnhancedNote, group: u32) -> EnhancedNote {
        note.beaming = Some(BeamingInfo {
            state: BeamState::Continue,
            beam_level: 1,
            can_beam: true,
            beat_position: 0.0,
            beam_group_id: Some(group),
        });
        note
    }

    #[test]
    fn direction_follows_middle_line() {
        assert_eq!(stem_for(&make_note(76, 1)), StemDirection::Down);
        assert_eq!(stem_for(&make_note(64, 1)), StemDirection::Up);
        // Bass staff
        assert_eq!(stem_for(&make_note(55, 1)), StemDirection::Down);
        assert_eq!(stem_for(&make_note(43, 1)), StemDirection::Up);
    }

    #[test]
    fn middle_line_uses_voice_parity() {
        assert_eq!(stem_for(&make_note(TREBLE_MIDDLE_LINE, 1)), StemDirection::Down);
        assert_eq!(stem_for(&make_note(TREBLE_MIDDLE_LINE, 2)), StemDirection::Up);
        assert_eq!(stem_for(&make_note(BASS_MIDDLE_LINE, 3)), StemDirection::Down);
        assert_eq!(stem_for(&make_note(BASS_MIDDLE_LINE, 0)), StemDirection::Up);
    }

    #[test]
    fn rests_get_no_stem() {
        let mut notes = vec![make_note(0, 1), make_note(64, 1)];
        notes[0].stem = Some(StemDirection::Up);

        assert_eq!(assign_stems(&mut notes), 1);
        assert_eq!(notes[0].stem, None);
        assert_eq!(notes[1].stem, Some(StemDirection::Up));
    }

    #[test]
    fn extreme_member_decides_group() {
        // 84 is 13 above the line, outweighing three notes just below it
        let mut notes = vec![
            in_group(make_note(69, 1), 0),
            in_group(make_note(67, 1), 0),
            in_group(make_note(84, 1), 0),
            in_group(make_note(65, 1), 0),
        ];

        assign_stems(&mut notes);

        assert!(notes.iter().all(|n| n.stem == Some(StemDirection::Down)));
    }

    #[test]
    fn opposite_extremes_fall_back_to_majority() {
        // 76 and 66 are both 5 from the line; 69 and 70 tip the vote up
        let mut notes = vec![
            in_group(make_note(76, 1), 3),
            in_group(make_note(66, 1), 3),
            in_group(make_note(69, 1), 3),
            in_group(make_note(70, 1), 3),
        ];

        assign_stems(&mut notes);

        assert!(notes.iter().all(|n| n.stem == Some(StemDirection::Up)));
    }

    #[test]
    fn even_split_uses_first_member_tie_break() {
        let mut notes = vec![in_group(make_note(74, 2), 1), in_group(make_note(68, 2), 1)];
        assign_stems(&mut notes);
        assert!(notes.iter().all(|n| n.stem == Some(StemDirection::Up)));

        let mut notes = vec![in_group(make_note(74, 1), 1), in_group(make_note(68, 1), 1)];
        assign_stems(&mut notes);
        assert!(notes.iter().all(|n| n.stem == Some(StemDirection::Down)));
    }

    #[test]
    fn groups_are_independent() {
        let mut notes = vec![
            in_group(make_note(79, 1), 0),
            in_group(make_note(77, 1), 0),
            in_group(make_note(62, 1), 1),
            in_group(make_note(64, 1), 1),
            make_note(72, 1),
        ];

        assign_stems(&mut notes);

        let stems: Vec<_> = notes.iter().map(|n| n.stem).collect();
        assert_eq!(
            stems,
            vec![
                Some(StemDirection::Down),
                Some(StemDirection::Down),
                Some(StemDirection::Up),
                Some(StemDirection::Up),
                Some(StemDirection::Down),
            ]
        );
    }
}
