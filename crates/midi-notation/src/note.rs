use serde::{Deserialize, Serialize};

/// A single sounding or rest event with absolute tick timing and source metadata.
///
/// A velocity of 0 marks a rest; its pitch is conventionally 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedNote {
    pub pitch: u8,
    pub channel: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub duration_ticks: u64,
    #[serde(default)]
    pub tie_start: bool,
    #[serde(default)]
    pub tie_stop: bool,
    pub track: usize,
    #[serde(default)]
    pub voice: u8,
}

impl TimedNote {
    pub fn is_rest(&self) -> bool {
        self.velocity == 0
    }

    pub fn end_tick(&self) -> u64 {
        self.start_tick.saturating_add(self.duration_ticks)
    }
}

/// Position of a note inside a beamed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeamState {
    None,
    Begin,
    Continue,
    End,
}

/// Beam annotation for one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamingInfo {
    pub state: BeamState,
    /// Number of beams: 1 for eighths, 2 for sixteenths, 3 for 32nds and shorter
    pub beam_level: u8,
    pub can_beam: bool,
    /// Onset in quarter-note beats from the start of the stream
    pub beat_position: f64,
    pub beam_group_id: Option<u32>,
}

/// Irregular grouping ratio, e.g. 3 in the time of 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuplet {
    pub actual_notes: u8,
    pub normal_notes: u8,
}

impl Tuplet {
    pub const TRIPLET: Tuplet = Tuplet {
        actual_notes: 3,
        normal_notes: 2,
    };
}

/// Tuplet membership of one note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupletInfo {
    pub tuplet: Tuplet,
    /// Index of the owning span in the pipeline's tuplet span list
    pub span_index: usize,
    /// First member of its span (bracket opens here)
    pub is_start: bool,
    /// Last member of its span (bracket closes here)
    pub is_end: bool,
}

/// Position and length of a notated rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestData {
    pub start_tick: u64,
    pub duration_ticks: u64,
}

/// Rest optimizer output for one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestInfo {
    /// The rest to notate at this slot; `None` when the fragment was
    /// absorbed into a neighbour by consolidation.
    pub rest: Option<RestData>,
    pub is_optimized_rest: bool,
    /// Duration of this fragment before consolidation
    pub original_duration: u64,
    /// Fit to the beat grid, 0.0–1.0 (1.0 = on a beat)
    pub alignment_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicMarking {
    Ppp,
    Pp,
    P,
    Mp,
    Mf,
    F,
    Ff,
    Fff,
}

impl DynamicMarking {
    /// MusicXML element name for this marking
    pub fn as_str(&self) -> &'static str {
        match self {
            DynamicMarking::Ppp => "ppp",
            DynamicMarking::Pp => "pp",
            DynamicMarking::P => "p",
            DynamicMarking::Mp => "mp",
            DynamicMarking::Mf => "mf",
            DynamicMarking::F => "f",
            DynamicMarking::Ff => "ff",
            DynamicMarking::Fff => "fff",
        }
    }
}

/// Dynamics marking supplied by the dynamics inferrer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsInfo {
    pub marking: DynamicMarking,
    /// A new marking should be printed at this note
    pub triggers_new: bool,
    pub previous: Option<DynamicMarking>,
    pub interpolated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemDirection {
    Up,
    Down,
}

/// A note plus the notation annotations the pipeline phases attach to it.
///
/// Each slot is owned by this note alone. Later phases may reset a slot to
/// `None` when it conflicts with another annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedNote {
    pub note: TimedNote,
    pub tuplet: Option<TupletInfo>,
    pub beaming: Option<BeamingInfo>,
    pub rest: Option<RestInfo>,
    pub dynamics: Option<DynamicsInfo>,
    /// Set by the rest optimizer, cleared with `rest` on conflict
    pub rest_processed: bool,
    pub stem: Option<StemDirection>,
}

impl EnhancedNote {
    pub fn new(note: TimedNote) -> Self {
        Self {
            note,
            tuplet: None,
            beaming: None,
            rest: None,
            dynamics: None,
            rest_processed: false,
            stem: None,
        }
    }

    pub fn is_rest(&self) -> bool {
        self.note.is_rest()
    }

    /// Beam group this note belongs to, if it is beamed at all.
    pub fn beam_group_id(&self) -> Option<u32> {
        self.beaming.as_ref().and_then(|b| b.beam_group_id)
    }

    pub fn beam_state(&self) -> Option<BeamState> {
        self.beaming.as_ref().map(|b| b.state)
    }
}

impl From<TimedNote> for EnhancedNote {
    fn from(note: TimedNote) -> Self {
        EnhancedNote::new(note)
    }
}
