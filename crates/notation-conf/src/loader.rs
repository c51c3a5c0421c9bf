//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, NotationConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with an explicit override path.
///
/// If `explicit` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/midi-notation/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("midi-notation/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = explicit {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("midi-notation.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay the values found in a TOML file onto `config`.
pub fn apply_file(config: &mut NotationConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    apply_table(config, &table);
    Ok(())
}

/// Overlay a parsed TOML table onto `config`.
///
/// Only keys present in the table are touched, so layering files in load
/// order gives "later wins" per key rather than per file.
pub fn apply_table(config: &mut NotationConfig, table: &toml::Table) {
    if let Some(features) = table.get("features").and_then(|v| v.as_table()) {
        if let Some(v) = features.get("tuplets").and_then(|v| v.as_bool()) {
            config.features.tuplets = v;
        }
        if let Some(v) = features.get("beaming").and_then(|v| v.as_bool()) {
            config.features.beaming = v;
        }
        if let Some(v) = features.get("rest_optimization").and_then(|v| v.as_bool()) {
            config.features.rest_optimization = v;
        }
        if let Some(v) = features.get("performance_fallback").and_then(|v| v.as_bool()) {
            config.features.performance_fallback = v;
        }
    }

    if let Some(timing) = table.get("timing").and_then(|v| v.as_table()) {
        if let Some(v) = timing.get("ticks_per_quarter").and_then(|v| v.as_integer()) {
            config.timing.ticks_per_quarter = v.max(0) as u32;
        }
    }

    if let Some(chords) = table.get("chords").and_then(|v| v.as_table()) {
        if let Some(v) = chords.get("tolerance_ticks").and_then(|v| v.as_integer()) {
            config.chords.tolerance_ticks = v.max(0) as u64;
        }
    }

    if let Some(beaming) = table.get("beaming").and_then(|v| v.as_table()) {
        if let Some(v) = beaming.get("gap_threshold_ticks").and_then(|v| v.as_integer()) {
            config.beaming.gap_threshold_ticks = Some(v.max(0) as u64);
        }
    }

    if let Some(rests) = table.get("rests").and_then(|v| v.as_table()) {
        if let Some(v) = rests.get("max_iterations").and_then(|v| v.as_integer()) {
            config.rests.max_iterations = v.max(0) as usize;
        }
    }

    if let Some(performance) = table.get("performance").and_then(|v| v.as_table()) {
        if let Some(v) = performance.get("target_ns_per_note").and_then(|v| v.as_integer()) {
            config.performance.target_ns_per_note = v.max(0) as u64;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut NotationConfig, sources: &mut ConfigSources) {
    let flags: [(&str, &mut bool); 4] = [
        ("MIDI_NOTATION_TUPLETS", &mut config.features.tuplets),
        ("MIDI_NOTATION_BEAMING", &mut config.features.beaming),
        (
            "MIDI_NOTATION_REST_OPTIMIZATION",
            &mut config.features.rest_optimization,
        ),
        (
            "MIDI_NOTATION_PERFORMANCE_FALLBACK",
            &mut config.features.performance_fallback,
        ),
    ];
    for (key, slot) in flags {
        if let Some(v) = env::var(key).ok().as_deref().and_then(parse_flag) {
            *slot = v;
            sources.env_overrides.push(key.to_string());
        }
    }

    if let Ok(v) = env::var("MIDI_NOTATION_TICKS_PER_QUARTER") {
        if let Ok(tpq) = v.parse() {
            config.timing.ticks_per_quarter = tpq;
            sources
                .env_overrides
                .push("MIDI_NOTATION_TICKS_PER_QUARTER".to_string());
        }
    }
    if let Ok(v) = env::var("MIDI_NOTATION_CHORD_TOLERANCE") {
        if let Ok(ticks) = v.parse() {
            config.chords.tolerance_ticks = ticks;
            sources
                .env_overrides
                .push("MIDI_NOTATION_CHORD_TOLERANCE".to_string());
        }
    }
    if let Ok(v) = env::var("MIDI_NOTATION_BEAM_GAP") {
        if let Ok(ticks) = v.parse() {
            config.beaming.gap_threshold_ticks = Some(ticks);
            sources.env_overrides.push("MIDI_NOTATION_BEAM_GAP".to_string());
        }
    }
    if let Ok(v) = env::var("MIDI_NOTATION_TARGET_NS_PER_NOTE") {
        if let Ok(ns) = v.parse() {
            config.performance.target_ns_per_note = ns;
            sources
                .env_overrides
                .push("MIDI_NOTATION_TARGET_NS_PER_NOTE".to_string());
        }
    }
}
