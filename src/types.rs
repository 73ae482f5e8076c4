//! Core record types for the shift reporting pipeline
//!
//! Every entity is recomputed fresh each reporting cycle from the external
//! stores; nothing here persists between cycles. Fields that can be absent
//! (strict-policy reference misses) are explicit `Option`s, never sentinels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recipe name of the sentinel reference row that supplies fallback
/// setup/cycle values under [`FallbackPolicy::DefaultRow`].
pub const DEFAULT_RECIPE_KEY: &str = "default";

/// One historized observation of the active-recipe signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Categorical value of the monitored signal (the active recipe name).
    pub recipe: String,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, recipe: impl Into<String>) -> Self {
        Self {
            timestamp,
            recipe: recipe.into(),
        }
    }
}

/// A recipe change produced by run-length compaction.
///
/// Invariant: no two consecutive events in a compacted sequence share the
/// same recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub recipe: String,
    pub observed_at: DateTime<Utc>,
}

/// A closed-open recipe run interval `[start, end)` inside a shift window.
///
/// Invariant: `start < end`. Intervals produced for one shift are contiguous
/// and non-overlapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub recipe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Interval duration in minutes, rounded to 2 decimals.
    pub fn duration_minutes(&self) -> f64 {
        crate::shift::minutes_between(self.start, self.end)
    }
}

/// One row of the recipe reference table.
///
/// `setup_time_minutes` is the fixed changeover cost; `cycle_target_minutes`
/// is the target cycle time in minutes per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub recipe: String,
    pub setup_time_minutes: f64,
    pub cycle_target_minutes: f64,
}

/// Missing-key policy for the reference join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Unmatched recipes keep `None` setup/cycle fields; downstream
    /// calculators skip that interval and report it.
    Strict,
    /// Unmatched recipes take the `"default"` sentinel row when the table
    /// has one, else behave like [`FallbackPolicy::Strict`].
    #[default]
    DefaultRow,
}

/// An interval joined with reference parameters and derived quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedInterval {
    pub recipe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
    /// `None` when the reference lookup missed under the strict policy.
    pub setup_time_minutes: Option<f64>,
    /// `None` when the reference lookup missed under the strict policy.
    pub cycle_target_minutes: Option<f64>,
    pub idle_time_minutes: f64,
    /// Never negative; 0 when the computation was degenerate.
    pub expected_parts: i64,
}

/// A persisted recipe run row, keyed by (machine unique name, recipe, start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRunRecord {
    /// `"<system>/<machine>"`, the unique name used by the run store.
    pub machine: String,
    pub recipe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
    pub setup_time_minutes: Option<f64>,
    pub cycle_target_minutes: Option<f64>,
    pub idle_time_minutes: f64,
    pub expected_parts: i64,
}

impl RecipeRunRecord {
    pub fn from_enriched(machine: impl Into<String>, run: &EnrichedInterval) -> Self {
        Self {
            machine: machine.into(),
            recipe: run.recipe.clone(),
            start: run.start,
            end: run.end,
            duration_minutes: run.duration_minutes,
            setup_time_minutes: run.setup_time_minutes,
            cycle_target_minutes: run.cycle_target_minutes,
            idle_time_minutes: run.idle_time_minutes,
            expected_parts: run.expected_parts,
        }
    }
}

/// Per-machine shift metrics.
///
/// Invariant: `run_minutes + idle_minutes + down_minutes == window_minutes`
/// by construction: downtime is the residual and is left
/// unclamped, since a negative value signals inconsistent upstream signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftAggregate {
    pub system: String,
    pub machine: String,
    pub total_expected_parts: i64,
    pub parts_complete: i64,
    pub idle_minutes: f64,
    pub run_minutes: f64,
    pub down_minutes: f64,
    pub window_minutes: f64,
}

/// A machine's currently-active recipe resolved against the reference table.
///
/// Field names follow the reference database columns so the JSON written to
/// the system recipe-info tag matches what operator displays expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecipe {
    #[serde(rename = "MachineName")]
    pub machine: String,
    #[serde(rename = "RecipeName")]
    pub recipe: String,
    #[serde(rename = "SetupTime")]
    pub setup_time_minutes: f64,
    #[serde(rename = "CycleTarget")]
    pub cycle_target_minutes: f64,
}

/// System-level scorecard for one reporting cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemAggregate {
    pub system: String,
    /// Read from the system-scoped completion counter, not summed from the
    /// per-machine counts.
    pub total_parts_complete: i64,
    /// Simplified capacity estimate: `round(window hours × 60)`.
    pub total_expected_parts: i64,
    pub score_percent: i64,
    /// Active recipe with the highest cycle target across the system's
    /// machines; `None` when no machine reported an active recipe.
    pub pace_setter: Option<ActiveRecipe>,
}
