//! Per-machine recipe run reconstruction (stages 1-5)
//!
//! One call rebuilds a machine's recipe runs for the shift window: query the
//! historian, compact, clip, join references, resolve idle time, compute
//! expected parts, and persist the closed runs.
//!
//! ## Incremental start
//!
//! Runs already persisted for this window are not recomputed. The historian
//! query resumes at the latest persisted run end; only the still-open tail
//! of the shift is reconstructed fresh. The final (open) interval of a cycle
//! is NOT persisted: it is still growing and is rebuilt whole
//! on the next cycle, so persisted rows never fragment a continuing run.

use crate::io::{
    with_timeout, CalcReader, ErrorReport, ErrorReporter, HistorianReader, ReferenceStore,
};
use crate::pipeline::{clipper, compactor, expected, idle, joiner};
use crate::shift::ShiftWindow;
use crate::store::RecipeRunStore;
use crate::tags::MachineTagPaths;
use crate::types::{EnrichedInterval, FallbackPolicy, RecipeRunRecord};
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tracing::debug;

/// Reconstructs one machine's enriched recipe runs for a shift window.
pub struct RecipeRunBuilder<'a> {
    pub historian: &'a dyn HistorianReader,
    pub calc: &'a dyn CalcReader,
    pub references: &'a dyn ReferenceStore,
    pub store: Option<&'a RecipeRunStore>,
    pub reporter: &'a dyn ErrorReporter,
    pub policy: FallbackPolicy,
    /// Margin queried before the reconstruction start so the recipe active
    /// at that instant is known.
    pub lookback: ChronoDuration,
    pub query_timeout: Duration,
}

impl RecipeRunBuilder<'_> {
    /// Build the machine's runs for `window`, reusing persisted runs where
    /// possible and upserting newly closed ones.
    ///
    /// `machine_key` is the normalized reference-store key;
    /// `machine_unique` is the `"<system>/<machine>"` run-store key. Any
    /// collaborator failure degrades this machine to the runs that could be
    /// reconstructed (possibly none) rather than erroring out.
    pub async fn build_shift_runs(
        &self,
        window: ShiftWindow,
        paths: &MachineTagPaths,
        machine_key: &str,
        machine_unique: &str,
    ) -> Vec<EnrichedInterval> {
        // Previously persisted runs for this window form the head.
        let mut runs = self.persisted_head(machine_unique, window);
        let resume = runs.last().map_or(window.start, |run| run.end);
        if resume >= window.end {
            return runs;
        }

        let fresh_window = ShiftWindow::new(resume, window.end);
        let query_start = fresh_window.start - self.lookback;

        let samples = match with_timeout(
            self.query_timeout,
            self.historian.query(&paths.active_recipe, query_start, window.end),
        )
        .await
        {
            Ok(samples) => samples,
            Err(e) => {
                self.reporter.report(ErrorReport::new(
                    "recipe_runs.historian",
                    machine_unique,
                    format!("historian query failed: {e}"),
                ));
                return runs;
            }
        };

        let events = compactor::compact(&samples);
        let intervals = clipper::clip_to_window(&events, fresh_window);
        debug!(
            machine = machine_unique,
            samples = samples.len(),
            events = events.len(),
            intervals = intervals.len(),
            "Reconstructed recipe intervals"
        );

        let references = match with_timeout(
            self.query_timeout,
            self.references.recipes_for_machine(machine_key),
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.reporter.report(ErrorReport::new(
                    "recipe_runs.reference_lookup",
                    machine_unique,
                    format!("reference lookup for {machine_key} failed: {e}"),
                ));
                Vec::new()
            }
        };

        let mut fresh = joiner::join_references(&intervals, &references, self.policy);
        idle::resolve_idle_times(
            &mut fresh,
            self.calc,
            &paths.idle,
            machine_unique,
            self.query_timeout,
            self.reporter,
        )
        .await;
        expected::fill_expected_parts(&mut fresh, machine_unique, self.reporter);

        self.persist_closed_runs(machine_unique, window, &fresh);

        runs.extend(fresh);
        runs
    }

    /// Persisted runs inside the window, clipped to those that closed before
    /// the window end and sorted by start.
    fn persisted_head(&self, machine_unique: &str, window: ShiftWindow) -> Vec<EnrichedInterval> {
        let Some(store) = self.store else {
            return Vec::new();
        };
        match store.runs_in_range(machine_unique, window.start, window.end) {
            Ok(records) => records
                .into_iter()
                .filter(|r| r.end <= window.end)
                .map(|r| EnrichedInterval {
                    recipe: r.recipe,
                    start: r.start,
                    end: r.end,
                    duration_minutes: r.duration_minutes,
                    setup_time_minutes: r.setup_time_minutes,
                    cycle_target_minutes: r.cycle_target_minutes,
                    idle_time_minutes: r.idle_time_minutes,
                    expected_parts: r.expected_parts,
                })
                .collect(),
            Err(e) => {
                self.reporter.report(ErrorReport::new(
                    "recipe_runs.store_read",
                    machine_unique,
                    format!("run store read failed: {e}"),
                ));
                Vec::new()
            }
        }
    }

    /// Upsert runs that ended strictly before the window end; the open tail
    /// run is rebuilt next cycle instead.
    fn persist_closed_runs(
        &self,
        machine_unique: &str,
        window: ShiftWindow,
        fresh: &[EnrichedInterval],
    ) {
        let Some(store) = self.store else {
            return;
        };
        for run in fresh.iter().filter(|r| r.end < window.end) {
            let record = RecipeRunRecord::from_enriched(machine_unique, run);
            if let Err(e) = store.upsert(&record) {
                self.reporter.report(ErrorReport::new(
                    "recipe_runs.store_upsert",
                    machine_unique,
                    format!("run upsert failed: {e}"),
                ));
            }
        }
    }
}
