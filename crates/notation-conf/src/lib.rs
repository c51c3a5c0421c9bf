//! Configuration loading for the MIDI notation annotation pipeline.
//!
//! Kept dependency-light so the pipeline core can import it without
//! dragging anything else along.
//!
//! # Usage
//!
//! ```rust,no_run
//! use notation_conf::NotationConfig;
//!
//! let config = NotationConfig::load().expect("Failed to load config");
//!
//! println!("beaming enabled: {}", config.features.beaming);
//! println!("ticks per quarter: {}", config.timing.ticks_per_quarter);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/midi-notation/config.toml` (system)
//! 2. `~/.config/midi-notation/config.toml` (user)
//! 3. `./midi-notation.toml` (local override), or an explicit path
//! 4. Environment variables (`MIDI_NOTATION_*`)
//!
//! # Example Config
//!
//! ```toml
//! [features]
//! tuplets = true
//! beaming = true
//! rest_optimization = true
//! performance_fallback = false
//!
//! [timing]
//! ticks_per_quarter = 480
//!
//! [chords]
//! tolerance_ticks = 0
//!
//! [beaming]
//! gap_threshold_ticks = 120
//!
//! [rests]
//! max_iterations = 10000
//!
//! [performance]
//! target_ns_per_note = 500
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    BeamConfig, ChordConfig, FeatureToggles, PerformanceConfig, RestConfig, TimingConfig,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotationConfig {
    #[serde(default)]
    pub features: FeatureToggles,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub chords: ChordConfig,

    #[serde(default)]
    pub beaming: BeamConfig,

    #[serde(default)]
    pub rests: RestConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl NotationConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/midi-notation/config.toml`
    /// 3. `~/.config/midi-notation/config.toml`
    /// 4. `./midi-notation.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./midi-notation.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = NotationConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        config.validate()?;
        Ok((config, sources))
    }

    /// Check values that would make the pipeline meaningless.
    ///
    /// Runs before any phase; a failure here is a caller error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tpq = self.timing.ticks_per_quarter;
        if tpq == 0 {
            return Err(ConfigError::Invalid(
                "timing.ticks_per_quarter must be greater than zero".to_string(),
            ));
        }
        if self.chords.tolerance_ticks > u64::from(tpq) * 4 {
            return Err(ConfigError::Invalid(format!(
                "chords.tolerance_ticks ({}) exceeds one whole note ({} ticks)",
                self.chords.tolerance_ticks,
                u64::from(tpq) * 4
            )));
        }
        if self.beaming.gap_threshold_ticks == Some(0) {
            return Err(ConfigError::Invalid(
                "beaming.gap_threshold_ticks must be greater than zero".to_string(),
            ));
        }
        if self.rests.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "rests.max_iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# MIDI notation pipeline configuration\n\n");

        output.push_str("[features]\n");
        output.push_str(&format!("tuplets = {}\n", self.features.tuplets));
        output.push_str(&format!("beaming = {}\n", self.features.beaming));
        output.push_str(&format!(
            "rest_optimization = {}\n",
            self.features.rest_optimization
        ));
        output.push_str(&format!(
            "performance_fallback = {}\n",
            self.features.performance_fallback
        ));

        output.push_str("\n[timing]\n");
        output.push_str(&format!(
            "ticks_per_quarter = {}\n",
            self.timing.ticks_per_quarter
        ));

        output.push_str("\n[chords]\n");
        output.push_str(&format!(
            "tolerance_ticks = {}\n",
            self.chords.tolerance_ticks
        ));

        output.push_str("\n[beaming]\n");
        match self.beaming.gap_threshold_ticks {
            Some(ticks) => output.push_str(&format!("gap_threshold_ticks = {}\n", ticks)),
            None => output.push_str("# gap_threshold_ticks = <one sixteenth note>\n"),
        }

        output.push_str("\n[rests]\n");
        output.push_str(&format!("max_iterations = {}\n", self.rests.max_iterations));

        output.push_str("\n[performance]\n");
        output.push_str(&format!(
            "target_ns_per_note = {}\n",
            self.performance.target_ns_per_note
        ));

        output
    }
}
