//! Reporting cycle coordinator
//!
//! Drives one full cycle: for every configured system, enumerate its
//! machines, reconstruct and aggregate each machine's shift (concurrently,
//! bounded by the configured worker pool), then roll the system up. Machines
//! share no mutable state, so the only ordering requirement is that the
//! rollup sees every machine's result, in browse order, which
//! the pace-setter tie-break depends on.
//!
//! Failure isolation: a failed topology browse skips that system only; a
//! failed machine degrades to zeroed metrics inside its own stages. Nothing
//! aborts the batch.

use crate::config::PlantConfig;
use crate::io::{
    with_timeout, CalcReader, ErrorReport, ErrorReporter, HistorianReader, ReferenceStore,
    TagBrowser, TagWriter,
};
use crate::pipeline::{recipe_runs::RecipeRunBuilder, rollup, ShiftAggregator};
use crate::shift::{current_shift_start, ShiftWindow};
use crate::store::RecipeRunStore;
use crate::tags::{MachineTagPaths, SystemTagPaths, SYSTEM_PSEUDO_CHILD};
use crate::types::{ActiveRecipe, ShiftAggregate, SystemAggregate};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Handles to the external collaborators, shared across machine tasks.
#[derive(Clone)]
pub struct PlantBackends {
    pub historian: Arc<dyn HistorianReader>,
    pub browser: Arc<dyn TagBrowser>,
    pub calc: Arc<dyn CalcReader>,
    pub references: Arc<dyn ReferenceStore>,
    pub writer: Arc<dyn TagWriter>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Summary of one reporting cycle.
#[derive(Debug, Clone)]
pub struct CycleStats {
    pub window: ShiftWindow,
    pub systems_processed: usize,
    pub systems_failed: usize,
    pub machines_processed: usize,
    pub machine_aggregates: Vec<ShiftAggregate>,
    pub system_aggregates: Vec<SystemAggregate>,
}

/// Runs reporting cycles against a set of plant backends.
pub struct ReportingCoordinator {
    backends: PlantBackends,
    config: Arc<PlantConfig>,
    store: Option<RecipeRunStore>,
}

impl ReportingCoordinator {
    pub fn new(
        backends: PlantBackends,
        config: Arc<PlantConfig>,
        store: Option<RecipeRunStore>,
    ) -> Self {
        Self {
            backends,
            config,
            store,
        }
    }

    /// Process every configured system for the shift containing `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleStats {
        let window = ShiftWindow::new(
            current_shift_start(now, &self.config.plant.shift_start_hours),
            now,
        );
        info!(
            start = %window.start,
            end = %window.end,
            minutes = window.minutes(),
            "Starting reporting cycle"
        );

        let mut stats = CycleStats {
            window,
            systems_processed: 0,
            systems_failed: 0,
            machines_processed: 0,
            machine_aggregates: Vec::new(),
            system_aggregates: Vec::new(),
        };

        for system in &self.config.plant.systems {
            match self.process_system(system, window).await {
                Some((machines, system_aggregate)) => {
                    stats.systems_processed += 1;
                    stats.machines_processed += machines.len();
                    stats.machine_aggregates.extend(machines);
                    stats.system_aggregates.push(system_aggregate);
                }
                None => stats.systems_failed += 1,
            }
        }

        info!(
            systems = stats.systems_processed,
            failed = stats.systems_failed,
            machines = stats.machines_processed,
            "Reporting cycle complete"
        );
        stats
    }

    /// Process one system. Returns `None` on enumeration failure (fatal for
    /// this system's cycle only).
    async fn process_system(
        &self,
        system: &str,
        window: ShiftWindow,
    ) -> Option<(Vec<ShiftAggregate>, SystemAggregate)> {
        let system_path = format!("{}{}", self.config.plant.tag_root, system);
        let timeout = Duration::from_secs(self.config.pipeline.query_timeout_secs);

        let machines = match with_timeout(timeout, self.backends.browser.browse(&system_path)).await
        {
            Ok(children) => children
                .into_iter()
                .filter(|name| name != SYSTEM_PSEUDO_CHILD)
                .collect::<Vec<_>>(),
            Err(e) => {
                self.backends.reporter.report(ErrorReport::new(
                    "coordinator.browse",
                    system,
                    format!("machine enumeration failed: {e}"),
                ));
                return None;
            }
        };

        if machines.is_empty() {
            warn!(system, "No machines found under system");
        }

        // Fan machines out, bounded by the worker pool. Results carry their
        // browse index so the rollup sees them in enumeration order.
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.machine_concurrency));
        let mut tasks: JoinSet<(usize, ShiftAggregate, Option<ActiveRecipe>)> = JoinSet::new();

        for (index, machine) in machines.iter().enumerate() {
            let backends = self.backends.clone();
            let config = Arc::clone(&self.config);
            let store = self.store.clone();
            let semaphore = Arc::clone(&semaphore);
            let system = system.to_string();
            let machine = machine.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let (aggregate, active) =
                    process_machine(&backends, &config, store.as_ref(), &system, &machine, window)
                        .await;
                (index, aggregate, active)
            });
        }

        let mut results: Vec<(usize, ShiftAggregate, Option<ActiveRecipe>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    self.backends.reporter.report(ErrorReport::new(
                        "coordinator.machine_task",
                        system,
                        format!("machine task failed: {e}"),
                    ));
                }
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        let active_recipes: Vec<ActiveRecipe> = results
            .iter()
            .filter_map(|(_, _, active)| active.clone())
            .collect();
        let aggregates: Vec<ShiftAggregate> =
            results.into_iter().map(|(_, agg, _)| agg).collect();

        let system_paths = SystemTagPaths::new(&self.config.plant.tag_root, system);
        let system_aggregate = rollup::roll_up_system(
            self.backends.calc.as_ref(),
            self.backends.writer.as_ref(),
            self.backends.reporter.as_ref(),
            system,
            &system_paths,
            window,
            &active_recipes,
            timeout,
        )
        .await;

        Some((aggregates, system_aggregate))
    }
}

/// Reconstruct and aggregate one machine's shift.
async fn process_machine(
    backends: &PlantBackends,
    config: &PlantConfig,
    store: Option<&RecipeRunStore>,
    system: &str,
    machine: &str,
    window: ShiftWindow,
) -> (ShiftAggregate, Option<ActiveRecipe>) {
    let paths = MachineTagPaths::new(&config.plant.tag_root, system, machine);
    let machine_key = config.normalize_machine_key(machine).to_string();
    let machine_unique = paths.machine_unique_name(&config.plant.tag_root);
    let timeout = Duration::from_secs(config.pipeline.query_timeout_secs);

    let builder = RecipeRunBuilder {
        historian: backends.historian.as_ref(),
        calc: backends.calc.as_ref(),
        references: backends.references.as_ref(),
        store,
        reporter: backends.reporter.as_ref(),
        policy: config.pipeline.fallback_policy,
        lookback: chrono::Duration::minutes(config.pipeline.lookback_minutes),
        query_timeout: timeout,
    };
    let runs = builder
        .build_shift_runs(window, &paths, &machine_key, &machine_unique)
        .await;

    let aggregator = ShiftAggregator {
        calc: backends.calc.as_ref(),
        writer: backends.writer.as_ref(),
        references: backends.references.as_ref(),
        reporter: backends.reporter.as_ref(),
        query_timeout: timeout,
    };
    aggregator
        .aggregate(system, machine, &machine_key, &paths, window, &runs)
        .await
}
