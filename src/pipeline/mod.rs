//! Shift Reporting Pipeline
//!
//! ## Stage Architecture
//!
//! ```text
//! STAGE 1: Compaction      (raw recipe samples → change events)
//! STAGE 2: Shift Clipping  (change events → closed-open intervals)
//! STAGE 3: Reference Join  (intervals + recipe table → setup/cycle fields)
//! STAGE 4: Idle Resolution (per-interval DurationOn → idle minutes)
//! STAGE 5: Expected Parts  (per-interval capacity formula)
//! STAGE 6: Shift Aggregate (per-machine sums, signals, heuristic, writes)
//! STAGE 7: System Rollup   (scorecard + pace-setter, per system)
//! ```
//!
//! Stages 1-5 run per machine inside [`recipe_runs`]; the coordinator fans
//! machines out concurrently and runs the rollup once per system. A failure
//! anywhere degrades the smallest enclosing unit (interval, machine, system)
//! to safe defaults; one bad machine never aborts the batch.

pub mod aggregator;
pub mod clipper;
pub mod compactor;
pub mod coordinator;
pub mod expected;
pub mod idle;
pub mod joiner;
pub mod recipe_runs;
pub mod rollup;

pub use aggregator::ShiftAggregator;
pub use coordinator::{CycleStats, PlantBackends, ReportingCoordinator};
pub use recipe_runs::RecipeRunBuilder;
pub use rollup::roll_up_system;
