//! Plant Configuration - reporting topology and pipeline policy as TOML
//!
//! The provider root, system list, shift boundaries, machine-name aliases,
//! and pipeline policy knobs are all operator-tunable fields here. Each
//! struct implements `Default`, so the pipeline runs with sensible values
//! when no config file is present.

use crate::types::FallbackPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading or validating a plant config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({0}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a plant deployment.
///
/// Load with `PlantConfig::load()` which searches:
/// 1. `$PLANT_CONFIG` env var
/// 2. `./plant_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlantConfig {
    /// Tag topology: provider root, systems, shift boundaries
    #[serde(default)]
    pub plant: PlantInfo,

    /// Pipeline policy knobs
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Exact-match machine-name aliases applied before reference lookups.
    ///
    /// Every key maps a physical machine name to the canonical key its
    /// recipes are stored under (e.g. `"Acme Robot 2" = "Acme Robot"`),
    /// collapsing families of identically-configured machines to one row.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// Tag topology and shift boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantInfo {
    /// Provider prefix all performance-tracking tags live under.
    #[serde(default = "default_tag_root")]
    pub tag_root: String,

    /// Systems to process each cycle.
    #[serde(default = "default_systems")]
    pub systems: Vec<String>,

    /// Hours of day (0-23) at which shifts start.
    #[serde(default = "default_shift_start_hours")]
    pub shift_start_hours: Vec<u32>,
}

fn default_tag_root() -> String {
    "[SCADA Overview]Performance Tracking/".to_string()
}
fn default_systems() -> Vec<String> {
    vec!["SimulationV2".to_string()]
}
fn default_shift_start_hours() -> Vec<u32> {
    vec![6, 8, 18]
}

impl Default for PlantInfo {
    fn default() -> Self {
        Self {
            tag_root: default_tag_root(),
            systems: default_systems(),
            shift_start_hours: default_shift_start_hours(),
        }
    }
}

/// Pipeline policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Missing-key policy for the reference join.
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,

    /// Historian lookback before the shift start, so the recipe active at
    /// the window open is always known (minutes).
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,

    /// Per-query timeout for external reads and writes (seconds).
    /// A timed-out query degrades to the data-not-found path.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Maximum machines processed concurrently within a system.
    #[serde(default = "default_machine_concurrency")]
    pub machine_concurrency: usize,
}

fn default_lookback_minutes() -> i64 {
    60
}
fn default_query_timeout_secs() -> u64 {
    10
}
fn default_machine_concurrency() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fallback_policy: FallbackPolicy::default(),
            lookback_minutes: default_lookback_minutes(),
            query_timeout_secs: default_query_timeout_secs(),
            machine_concurrency: default_machine_concurrency(),
        }
    }
}

impl PlantConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PLANT_CONFIG` environment variable
    /// 2. `./plant_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("PLANT_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded plant config from PLANT_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from PLANT_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "PLANT_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("plant_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded plant config from ./plant_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./plant_config.toml, using defaults");
                }
            }
        }

        info!("No plant_config.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check field ranges. Returns all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.plant.systems.is_empty() {
            errors.push("plant.systems must list at least one system".to_string());
        }
        if self.plant.shift_start_hours.is_empty() {
            errors.push("plant.shift_start_hours must list at least one hour".to_string());
        }
        for &h in &self.plant.shift_start_hours {
            if h > 23 {
                errors.push(format!("plant.shift_start_hours entry {h} is not a valid hour"));
            }
        }
        if self.pipeline.lookback_minutes < 0 {
            errors.push("pipeline.lookback_minutes must be non-negative".to_string());
        }
        if self.pipeline.query_timeout_secs == 0 {
            errors.push("pipeline.query_timeout_secs must be at least 1".to_string());
        }
        if self.pipeline.machine_concurrency == 0 {
            errors.push("pipeline.machine_concurrency must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Canonical reference key for a machine name.
    ///
    /// Exact-match lookup in the alias table; names without an alias are
    /// their own key. Applied before every reference-store query.
    pub fn normalize_machine_key<'a>(&'a self, machine: &'a str) -> &'a str {
        self.aliases.get(machine).map_or(machine, String::as_str)
    }
}
