//! Simulated plant backend
//!
//! Generates a deterministic day of plant activity for every configured
//! system so the reporting pipeline can run without a live gateway:
//! per-machine recipe schedules sampled the way a historian stores them,
//! idle/in-cycle duration signals, cycle-done pulses at roughly the recipe's
//! target rate, and a recipe reference table with a `default` sentinel row.
//!
//! Machine 3 of each system is generated with stuck duration signals
//! (completions but zero idle/in-cycle time) to exercise the run-time
//! estimation heuristic, and the last machine periodically runs an
//! off-catalog trial recipe to exercise reference fallback.

use crate::config::PlantConfig;
use crate::io::memory::{
    InMemoryBrowser, InMemoryCalc, InMemoryHistorian, InMemoryReferenceStore, InMemoryTagWriter,
};
use crate::io::{TagValue, TracingReporter};
use crate::pipeline::PlantBackends;
use crate::tags::{MachineTagPaths, SystemTagPaths, SYSTEM_PSEUDO_CHILD};
use crate::types::{ReferenceRecord, Sample};
use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use std::sync::Arc;

/// Hours of plant history generated before `now`.
const HISTORY_HOURS: i64 = 24;
/// Historian storage interval for the recipe signal.
const SAMPLE_MINUTES: i64 = 5;
/// Machines generated per system.
const MACHINES_PER_SYSTEM: usize = 4;
/// Recipe catalog shared by the generator (name, setup min, cycle min/part).
const CATALOG: &[(&str, f64, f64)] = &[
    ("Widget A", 10.0, 2.0),
    ("Widget B", 8.0, 1.5),
    ("Gauge Frame", 15.0, 3.0),
    ("Bracket 12", 5.0, 1.0),
    ("Housing 7", 12.0, 2.5),
];
/// Recipe scheduled but deliberately missing from the reference table.
const TRIAL_RECIPE: &str = "Trial Batch";

/// In-memory plant populated with generated signals.
pub struct SimPlant {
    pub historian: Arc<InMemoryHistorian>,
    pub browser: Arc<InMemoryBrowser>,
    pub calc: Arc<InMemoryCalc>,
    pub references: Arc<InMemoryReferenceStore>,
    pub writer: Arc<InMemoryTagWriter>,
}

impl SimPlant {
    /// Generate plant activity for every system in `config`, ending at `now`.
    pub fn generate(config: &PlantConfig, seed: u64, now: DateTime<Utc>) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let plant = Self {
            historian: Arc::new(InMemoryHistorian::new()),
            browser: Arc::new(InMemoryBrowser::new()),
            calc: Arc::new(InMemoryCalc::new()),
            references: Arc::new(InMemoryReferenceStore::new()),
            writer: Arc::new(InMemoryTagWriter::new()),
        };

        for system in &config.plant.systems {
            plant.generate_system(config, system, now, &mut rng);
        }
        plant
    }

    /// Bundle the simulated collaborators for the coordinator.
    pub fn backends(&self) -> PlantBackends {
        PlantBackends {
            historian: self.historian.clone(),
            browser: self.browser.clone(),
            calc: self.calc.clone(),
            references: self.references.clone(),
            writer: self.writer.clone(),
            reporter: Arc::new(TracingReporter),
        }
    }

    fn generate_system(
        &self,
        config: &PlantConfig,
        system: &str,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) {
        let machine_names: Vec<String> = (1..=MACHINES_PER_SYSTEM)
            .map(|i| format!("Machine {i}"))
            .collect();

        let mut children = machine_names.clone();
        children.push(SYSTEM_PSEUDO_CHILD.to_string());
        self.browser
            .set_children(format!("{}{}", config.plant.tag_root, system), children);

        let system_paths = SystemTagPaths::new(&config.plant.tag_root, system);
        let mut system_completions: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();

        for (index, machine) in machine_names.iter().enumerate() {
            let completions = self.generate_machine(config, system, machine, index, now, rng);
            system_completions.extend(completions);
        }

        self.calc
            .set_on_spans(system_paths.cycle_done, system_completions);
    }

    /// Generate one machine's day. Returns its cycle-done spans so the
    /// system-scoped counter can be built from them.
    fn generate_machine(
        &self,
        config: &PlantConfig,
        system: &str,
        machine: &str,
        index: usize,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let paths = MachineTagPaths::new(&config.plant.tag_root, system, machine);
        let machine_key = config.normalize_machine_key(machine).to_string();

        // Each machine runs a subset of the catalog; the reference table
        // always carries the default sentinel.
        let mut rows: Vec<ReferenceRecord> = CATALOG
            .choose_multiple(rng, 3)
            .map(|&(recipe, setup, cycle)| ReferenceRecord {
                recipe: recipe.to_string(),
                setup_time_minutes: setup,
                cycle_target_minutes: cycle,
            })
            .collect();
        rows.push(ReferenceRecord {
            recipe: crate::types::DEFAULT_RECIPE_KEY.to_string(),
            setup_time_minutes: 10.0,
            cycle_target_minutes: 3.0,
        });
        let schedule_pool: Vec<ReferenceRecord> = rows[..3].to_vec();
        self.references.set_rows(machine_key, rows);

        let stuck_signals = index == 2;
        let runs_trial_recipe = index == MACHINES_PER_SYSTEM - 1;

        let mut samples: Vec<Sample> = Vec::new();
        let mut idle_spans = Vec::new();
        let mut cycle_spans = Vec::new();
        let mut completion_spans = Vec::new();
        let mut last_recipe = String::new();

        let mut block_start = now - Duration::hours(HISTORY_HOURS);
        while block_start < now {
            let block_minutes = rng.gen_range(60..=240);
            let block_end = (block_start + Duration::minutes(block_minutes)).min(now);

            let (recipe, setup, cycle_target) = if runs_trial_recipe && rng.gen_bool(0.25) {
                (TRIAL_RECIPE.to_string(), 10.0, 3.0)
            } else {
                let row = &schedule_pool[rng.gen_range(0..schedule_pool.len())];
                (
                    row.recipe.clone(),
                    row.setup_time_minutes,
                    row.cycle_target_minutes,
                )
            };

            // Historian samples: one at the block start, then every storage
            // interval, consecutive duplicates included, as stored.
            let mut t = block_start;
            while t < block_end {
                samples.push(Sample::new(t, recipe.clone()));
                t += Duration::minutes(SAMPLE_MINUTES);
            }

            // Setup (idle), then production (in cycle) with completion
            // pulses near the target rate.
            let production_start = (block_start + Duration::minutes(setup as i64)).min(block_end);
            if !stuck_signals && production_start > block_start {
                idle_spans.push((block_start, production_start));
            }
            if production_start < block_end {
                if !stuck_signals {
                    cycle_spans.push((production_start, block_end));
                }
                let pace = Duration::seconds((cycle_target * 60.0 * rng.gen_range(1.0..1.2)) as i64);
                let mut done = production_start + pace;
                while done < block_end {
                    completion_spans.push((done, done + Duration::seconds(2)));
                    done += pace;
                }
            }

            last_recipe = recipe;
            block_start = block_end;
        }

        self.historian.set_series(paths.active_recipe.clone(), samples);
        self.calc.set_on_spans(paths.idle, idle_spans);
        self.calc.set_on_spans(paths.in_cycle, cycle_spans);
        self.calc
            .set_on_spans(paths.cycle_done, completion_spans.clone());
        self.calc
            .set_current(paths.active_recipe, TagValue::Text(last_recipe));

        completion_spans
    }
}
