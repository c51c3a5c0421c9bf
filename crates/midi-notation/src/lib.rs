//! Notation annotation for parsed MIDI note streams.
//!
//! Takes the flat note list a MIDI parser produces and decides how it should
//! be notated: which notes form chords, how notes are beamed, how runs of
//! rests are consolidated, which stem direction each note gets, and how
//! conflicting hints (rests, beams, tuplets, dynamics) are reconciled so
//! every note carries one consistent set of annotations.
//!
//! # Example
//!
//! ```
//! use midi_notation::{annotate, NotationConfig, PipelineInput, TimedNote};
//!
//! let notes = vec![
//!     TimedNote { pitch: 60, channel: 0, velocity: 80, start_tick: 0, duration_ticks: 480,
//!                 tie_start: false, tie_stop: false, track: 0, voice: 1 },
//!     TimedNote { pitch: 64, channel: 0, velocity: 80, start_tick: 0, duration_ticks: 480,
//!                 tie_start: false, tie_stop: false, track: 0, voice: 1 },
//! ];
//!
//! let score = annotate(PipelineInput::from_notes(notes), &NotationConfig::default()).unwrap();
//! assert_eq!(score.chords.len(), 1);
//! ```

pub mod beam;
pub mod chord;
pub mod coordinate;
pub mod metrics;
pub mod note;
pub mod pipeline;
pub mod rest;
pub mod stem;
pub mod tuplet;

pub use beam::{coordinate_beams, BeamGroupInfo};
pub use chord::{detect_chords, detect_cross_track_chords, ChordGroup, Staff};
pub use coordinate::{coordinate, validate, CoordinationReport, ValidationReport};
pub use metrics::{PhaseMetrics, PipelineMetrics};
pub use note::{
    BeamState, BeamingInfo, DynamicMarking, DynamicsInfo, EnhancedNote, RestData, RestInfo,
    StemDirection, TimedNote, Tuplet, TupletInfo,
};
pub use notation_conf::NotationConfig;
pub use pipeline::{annotate, AnnotatedScore, PipelineInput};
pub use rest::{optimize_rests, RestSpan};
pub use stem::assign_stems;
pub use tuplet::{attach_tuplets, TupletSpan};

/// Errors that abort or degrade a notation conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation failed for {what}: {source}")]
    Allocation {
        what: &'static str,
        source: std::collections::TryReserveError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{phase} phase failed: {reason}")]
    FeatureProcessingFailed { phase: &'static str, reason: String },
}

impl From<notation_conf::ConfigError> for Error {
    fn from(err: notation_conf::ConfigError) -> Self {
        match err {
            notation_conf::ConfigError::Invalid(message) => Error::InvalidConfiguration(message),
            other => Error::InvalidConfiguration(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reserve room for `additional` more elements, mapping failure to [`Error::Allocation`].
pub(crate) fn try_reserve<T>(buf: &mut Vec<T>, additional: usize, what: &'static str) -> Result<()> {
    buf.try_reserve(additional)
        .map_err(|source| Error::Allocation { what, source })
}
