//! ProdWatch - Shift Performance Tracking
//!
//! Runs reporting cycles against a simulated plant backend: reconstructs
//! each machine's recipe runs for the current shift, writes the machine
//! shift tags, and rolls every system up to a scorecard.
//!
//! # Usage
//!
//! ```bash
//! # One cycle against the built-in simulated plant
//! cargo run --release -- --once
//!
//! # Continuous cycles every 5 minutes with a custom config
//! cargo run --release -- --config plant_config.toml
//! ```
//!
//! # Environment Variables
//!
//! - `PLANT_CONFIG`: Path to a plant config TOML (when `--config` not given)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use prodwatch::config::{self, PlantConfig};
use prodwatch::pipeline::{CycleStats, ReportingCoordinator};
use prodwatch::sim::SimPlant;
use prodwatch::store::RecipeRunStore;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "prodwatch")]
#[command(about = "Shift performance tracking for SCADA-monitored machine fleets")]
#[command(version)]
struct CliArgs {
    /// Path to the plant config TOML (overrides PLANT_CONFIG and the
    /// ./plant_config.toml search)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single reporting cycle and exit
    #[arg(long)]
    once: bool,

    /// Seconds between reporting cycles
    #[arg(long, default_value = "300")]
    interval_secs: u64,

    /// Seed for the simulated plant generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Directory for the recipe-run history database
    #[arg(long, default_value = "prodwatch_runs")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let plant_config = match &args.config {
        Some(path) => PlantConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PlantConfig::load(),
    };
    config::init(plant_config.clone());
    let plant_config = Arc::new(plant_config);

    info!("ProdWatch starting");
    info!(
        systems = plant_config.plant.systems.len(),
        shift_hours = ?plant_config.plant.shift_start_hours,
        policy = ?plant_config.pipeline.fallback_policy,
        "Plant configuration loaded"
    );

    let store = RecipeRunStore::open(&args.data_dir)
        .with_context(|| format!("failed to open run store at {}", args.data_dir.display()))?;

    let plant = SimPlant::generate(&plant_config, args.seed, chrono::Utc::now());
    info!(seed = args.seed, "Simulated plant generated");

    let coordinator = ReportingCoordinator::new(
        plant.backends(),
        Arc::clone(&plant_config),
        Some(store),
    );

    loop {
        let stats = coordinator.run_cycle(chrono::Utc::now()).await;
        log_cycle(&stats);

        if args.once {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(args.interval_secs)).await;
    }

    Ok(())
}

/// Log the cycle outcome at a glance: one line per machine, one per system.
fn log_cycle(stats: &CycleStats) {
    for machine in &stats.machine_aggregates {
        info!(
            system = %machine.system,
            machine = %machine.machine,
            expected = machine.total_expected_parts,
            complete = machine.parts_complete,
            run_min = machine.run_minutes,
            idle_min = machine.idle_minutes,
            down_min = machine.down_minutes,
            "Machine shift metrics"
        );
    }
    for system in &stats.system_aggregates {
        info!(
            system = %system.system,
            complete = system.total_parts_complete,
            expected = system.total_expected_parts,
            score = system.score_percent,
            pace_setter = system
                .pace_setter
                .as_ref()
                .map(|p| p.machine.as_str())
                .unwrap_or("-"),
            "System scorecard"
        );
    }
}
