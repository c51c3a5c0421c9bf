//! Configuration sections - one struct per pipeline concern.

use serde::{Deserialize, Serialize};

/// On/off switches for the optional pipeline phases.
///
/// Turning a phase off skips it without changing any data-model contract:
/// the notes simply carry no annotations of that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Attach externally detected tuplet spans to notes.
    /// Default: true
    #[serde(default = "FeatureToggles::default_on")]
    pub tuplets: bool,

    /// Build, repair and normalize beam groups.
    /// Default: true
    #[serde(default = "FeatureToggles::default_on")]
    pub beaming: bool,

    /// Consolidate runs of rests into aligned rest spans.
    /// Default: true
    #[serde(default = "FeatureToggles::default_on")]
    pub rest_optimization: bool,

    /// When a phase cannot complete, strip its annotations and continue
    /// instead of failing the whole conversion.
    /// Default: false
    #[serde(default)]
    pub performance_fallback: bool,
}

impl FeatureToggles {
    fn default_on() -> bool {
        true
    }
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            tuplets: true,
            beaming: true,
            rest_optimization: true,
            performance_fallback: false,
        }
    }
}

/// Tick resolution of the incoming note stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Ticks per quarter note.
    /// Default: 480
    #[serde(default = "TimingConfig::default_ticks_per_quarter")]
    pub ticks_per_quarter: u32,
}

impl TimingConfig {
    fn default_ticks_per_quarter() -> u32 {
        480
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ticks_per_quarter: Self::default_ticks_per_quarter(),
        }
    }
}

/// Chord detection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChordConfig {
    /// Onset window in ticks. 0 requires exact tick equality.
    /// Default: 0
    #[serde(default)]
    pub tolerance_ticks: u64,
}

/// Beam coordination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BeamConfig {
    /// Start-to-start gap that breaks a beam. `None` scales one sixteenth
    /// note to the configured resolution (120 ticks at 480 ppq).
    /// Default: None
    #[serde(default)]
    pub gap_threshold_ticks: Option<u64>,
}

/// Rest optimizer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestConfig {
    /// Consolidation steps allowed per pipeline run before the optimizer
    /// stops and keeps what it has.
    /// Default: 10000
    #[serde(default = "RestConfig::default_max_iterations")]
    pub max_iterations: usize,
}

impl RestConfig {
    fn default_max_iterations() -> usize {
        10_000
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            max_iterations: Self::default_max_iterations(),
        }
    }
}

/// Performance budget. Exceeding it is logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Target cost of the full phase chain, in nanoseconds per note.
    /// Default: 500
    #[serde(default = "PerformanceConfig::default_target_ns_per_note")]
    pub target_ns_per_note: u64,
}

impl PerformanceConfig {
    fn default_target_ns_per_note() -> u64 {
        500
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_ns_per_note: Self::default_target_ns_per_note(),
        }
    }
}
