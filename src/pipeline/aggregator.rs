//! Stage 6: per-machine shift aggregation
//!
//! Sums the reconstructed runs, pulls the shift-level completion and
//! duration signals, estimates run time when those signals are degenerate,
//! derives downtime as the residual, and writes the machine's shift tags.
//!
//! ## Degenerate-signal heuristic
//!
//! Some machines report completed cycles while their idle/in-cycle signals
//! are stuck at zero. When `parts_complete > 0` and both duration signals
//! are 0, run time is estimated from the completion ratio:
//! `run = window × clamp(round(parts/expected, 1), 0, 1)`. The denominator
//! is the machine's own completion count (the system-scoped counter feeds
//! only the rollup). When `expected == 0` the estimate is skipped and run
//! time stays 0: logged, never a fault.

use crate::io::{
    with_timeout, CalcKind, CalcReader, ErrorReport, ErrorReporter, ReferenceStore, TagValue,
    TagWriter,
};
use crate::shift::{round_to, seconds_to_minutes, ShiftWindow};
use crate::tags::MachineTagPaths;
use crate::types::{ActiveRecipe, EnrichedInterval, ShiftAggregate};
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregates one machine's shift metrics and writes its shift tags.
pub struct ShiftAggregator<'a> {
    pub calc: &'a dyn CalcReader,
    pub writer: &'a dyn TagWriter,
    pub references: &'a dyn ReferenceStore,
    pub reporter: &'a dyn ErrorReporter,
    pub query_timeout: Duration,
}

impl ShiftAggregator<'_> {
    /// Aggregate `runs` for the window, persist the shift tags, and capture
    /// the machine's active recipe for pace-setter selection.
    pub async fn aggregate(
        &self,
        system: &str,
        machine: &str,
        machine_key: &str,
        paths: &MachineTagPaths,
        window: ShiftWindow,
        runs: &[EnrichedInterval],
    ) -> (ShiftAggregate, Option<ActiveRecipe>) {
        let scope = format!("{system}/{machine}");

        let total_expected_parts: i64 = runs.iter().map(|r| r.expected_parts).sum();
        let parts_complete = self
            .count_on(&paths.cycle_done, window, &scope, "aggregator.parts_complete")
            .await;
        let idle_minutes = self
            .duration_minutes(&paths.idle, window, &scope, "aggregator.idle_time")
            .await;
        let mut run_minutes = self
            .duration_minutes(&paths.in_cycle, window, &scope, "aggregator.run_time")
            .await;
        let window_minutes = window.minutes();

        if parts_complete > 0 && idle_minutes == 0.0 && run_minutes == 0.0 {
            if total_expected_parts > 0 {
                let score = round_to(parts_complete as f64 / total_expected_parts as f64, 1)
                    .clamp(0.0, 1.0);
                run_minutes = round_to(window_minutes * score, 1);
                debug!(
                    scope = %scope,
                    parts_complete, score, run_minutes, "Estimated run time from completion ratio"
                );
            } else {
                warn!(
                    scope = %scope,
                    parts_complete,
                    "Duration signals degenerate and no expected parts, leaving run time at 0"
                );
            }
        }

        let down_minutes = round_to(window_minutes - idle_minutes - run_minutes, 2);

        let aggregate = ShiftAggregate {
            system: system.to_string(),
            machine: machine.to_string(),
            total_expected_parts,
            parts_complete,
            idle_minutes,
            run_minutes,
            down_minutes,
            window_minutes,
        };

        self.write_shift_tags(paths, &aggregate, &scope).await;
        let active = self.active_recipe(machine, machine_key, paths, &scope).await;

        (aggregate, active)
    }

    /// CountOn query with the data-not-found → 0 contract.
    async fn count_on(&self, path: &str, window: ShiftWindow, scope: &str, stage: &str) -> i64 {
        match with_timeout(
            self.query_timeout,
            self.calc.calc(path, CalcKind::CountOn, window.start, window.end),
        )
        .await
        {
            Ok(Some(count)) if count.is_finite() => count as i64,
            Ok(_) => 0,
            Err(e) => {
                self.reporter
                    .report(ErrorReport::new(stage, scope, format!("CountOn failed: {e}")));
                0
            }
        }
    }

    /// DurationOn query in minutes with the data-not-found → 0 contract.
    async fn duration_minutes(
        &self,
        path: &str,
        window: ShiftWindow,
        scope: &str,
        stage: &str,
    ) -> f64 {
        match with_timeout(
            self.query_timeout,
            self.calc.calc(path, CalcKind::DurationOn, window.start, window.end),
        )
        .await
        {
            Ok(Some(seconds)) if seconds.is_finite() => seconds_to_minutes(seconds.max(0.0)),
            Ok(_) => 0.0,
            Err(e) => {
                self.reporter
                    .report(ErrorReport::new(stage, scope, format!("DurationOn failed: {e}")));
                0.0
            }
        }
    }

    /// Write the five shift tags. A rejected write is reported with its
    /// stage context and does not roll back the in-memory aggregate.
    async fn write_shift_tags(&self, paths: &MachineTagPaths, agg: &ShiftAggregate, scope: &str) {
        let writes = [
            (&paths.shift_run_time, TagValue::Float(agg.run_minutes)),
            (&paths.shift_idle_time, TagValue::Float(agg.idle_minutes)),
            (&paths.shift_down_time, TagValue::Float(agg.down_minutes)),
            (&paths.expected_parts, TagValue::Int(agg.total_expected_parts)),
            (&paths.parts_complete, TagValue::Int(agg.parts_complete)),
        ];
        for (path, value) in writes {
            if let Err(e) =
                with_timeout(self.query_timeout, self.writer.write(path, value)).await
            {
                self.reporter.report(ErrorReport::new(
                    "aggregator.tag_write",
                    scope,
                    format!("write to {path} rejected: {e}"),
                ));
            }
        }
    }

    /// Read the active-recipe tag and resolve it against the reference
    /// store. Absence is normal (machine between recipes); only transport
    /// failures are reported.
    async fn active_recipe(
        &self,
        machine: &str,
        machine_key: &str,
        paths: &MachineTagPaths,
        scope: &str,
    ) -> Option<ActiveRecipe> {
        let recipe_name = match with_timeout(
            self.query_timeout,
            self.calc.read_tag(&paths.active_recipe),
        )
        .await
        {
            Ok(Some(TagValue::Text(name))) => name,
            Ok(_) => return None,
            Err(e) => {
                self.reporter.report(ErrorReport::new(
                    "aggregator.active_recipe",
                    scope,
                    format!("active recipe read failed: {e}"),
                ));
                return None;
            }
        };

        match with_timeout(
            self.query_timeout,
            self.references.recipe(machine_key, &recipe_name),
        )
        .await
        {
            Ok(Some(record)) => Some(ActiveRecipe {
                machine: machine.to_string(),
                recipe: record.recipe,
                setup_time_minutes: record.setup_time_minutes,
                cycle_target_minutes: record.cycle_target_minutes,
            }),
            Ok(None) => None,
            Err(e) => {
                self.reporter.report(ErrorReport::new(
                    "aggregator.active_recipe",
                    scope,
                    format!("reference lookup for {recipe_name} failed: {e}"),
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{
        CollectingReporter, InMemoryCalc, InMemoryReferenceStore, InMemoryTagWriter,
    };
    use crate::types::ReferenceRecord;
    use chrono::{DateTime, TimeZone, Utc};

    const ROOT: &str = "[SCADA Overview]Performance Tracking/";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, h, m, 0).single().unwrap()
    }

    fn run(expected: i64) -> EnrichedInterval {
        EnrichedInterval {
            recipe: "Widget".to_string(),
            start: at(8, 0),
            end: at(16, 0),
            duration_minutes: 480.0,
            setup_time_minutes: Some(10.0),
            cycle_target_minutes: Some(2.0),
            idle_time_minutes: 0.0,
            expected_parts: expected,
        }
    }

    struct Fixture {
        calc: InMemoryCalc,
        writer: InMemoryTagWriter,
        references: InMemoryReferenceStore,
        reporter: CollectingReporter,
        paths: MachineTagPaths,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                calc: InMemoryCalc::new(),
                writer: InMemoryTagWriter::new(),
                references: InMemoryReferenceStore::new(),
                reporter: CollectingReporter::new(),
                paths: MachineTagPaths::new(ROOT, "Line A", "Machine 1"),
            }
        }

        fn aggregator(&self) -> ShiftAggregator<'_> {
            ShiftAggregator {
                calc: &self.calc,
                writer: &self.writer,
                references: &self.references,
                reporter: &self.reporter,
                query_timeout: Duration::from_secs(5),
            }
        }

        async fn aggregate(&self, runs: &[EnrichedInterval]) -> (ShiftAggregate, Option<ActiveRecipe>) {
            self.aggregator()
                .aggregate(
                    "Line A",
                    "Machine 1",
                    "Machine 1",
                    &self.paths,
                    ShiftWindow::new(at(8, 0), at(16, 0)),
                    runs,
                )
                .await
        }
    }

    #[tokio::test]
    async fn sums_signals_and_derives_downtime() {
        let fx = Fixture::new();
        // 3 completed cycles, 60 min idle, 300 min in cycle.
        fx.calc.set_on_spans(
            fx.paths.cycle_done.clone(),
            vec![(at(9, 0), at(9, 1)), (at(10, 0), at(10, 1)), (at(11, 0), at(11, 1))],
        );
        fx.calc
            .set_on_spans(fx.paths.idle.clone(), vec![(at(8, 0), at(9, 0))]);
        fx.calc
            .set_on_spans(fx.paths.in_cycle.clone(), vec![(at(9, 0), at(14, 0))]);

        let (agg, _) = fx.aggregate(&[run(235)]).await;

        assert_eq!(agg.total_expected_parts, 235);
        assert_eq!(agg.parts_complete, 3);
        assert!((agg.idle_minutes - 60.0).abs() < f64::EPSILON);
        assert!((agg.run_minutes - 300.0).abs() < f64::EPSILON);
        assert!((agg.down_minutes - 120.0).abs() < f64::EPSILON);
        // Identity: run + idle + down == window.
        assert!(
            (agg.run_minutes + agg.idle_minutes + agg.down_minutes - agg.window_minutes).abs()
                < 1e-9
        );
    }

    #[tokio::test]
    async fn missing_signals_default_to_zero() {
        let fx = Fixture::new();
        let (agg, _) = fx.aggregate(&[run(100)]).await;

        assert_eq!(agg.parts_complete, 0);
        assert_eq!(agg.idle_minutes, 0.0);
        assert_eq!(agg.run_minutes, 0.0);
        assert!((agg.down_minutes - 480.0).abs() < f64::EPSILON);
        assert!(fx.reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn heuristic_estimates_run_time_from_completion_ratio() {
        let fx = Fixture::new();
        // 50 completions, duration signals stuck at zero.
        let spans: Vec<_> = (0..50)
            .map(|i| {
                let on = at(9, 0) + chrono::Duration::seconds(i * 60);
                (on, on + chrono::Duration::seconds(5))
            })
            .collect();
        fx.calc.set_on_spans(fx.paths.cycle_done.clone(), spans);

        let (agg, _) = fx.aggregate(&[run(100)]).await;

        // score = round(50/100, 1) = 0.5 → run = 480 × 0.5 = 240, down = 240.
        assert_eq!(agg.parts_complete, 50);
        assert!((agg.run_minutes - 240.0).abs() < f64::EPSILON);
        assert!((agg.down_minutes - 240.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn heuristic_skipped_when_no_expected_parts() {
        let fx = Fixture::new();
        fx.calc.set_on_spans(
            fx.paths.cycle_done.clone(),
            vec![(at(9, 0), at(9, 1))],
        );

        let (agg, _) = fx.aggregate(&[]).await;

        assert_eq!(agg.total_expected_parts, 0);
        assert_eq!(agg.parts_complete, 1);
        assert_eq!(agg.run_minutes, 0.0);
        assert!((agg.down_minutes - 480.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn heuristic_score_is_clamped_to_one() {
        let fx = Fixture::new();
        let spans: Vec<_> = (0..200)
            .map(|i| {
                let on = at(9, 0) + chrono::Duration::seconds(i * 60);
                (on, on + chrono::Duration::seconds(5))
            })
            .collect();
        fx.calc.set_on_spans(fx.paths.cycle_done.clone(), spans);

        let (agg, _) = fx.aggregate(&[run(100)]).await;

        // 200/100 rounds to 2.0, clamps to 1.0 → run = full window.
        assert!((agg.run_minutes - 480.0).abs() < f64::EPSILON);
        assert!(agg.down_minutes.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn writes_all_five_shift_tags() {
        let fx = Fixture::new();
        fx.calc
            .set_on_spans(fx.paths.in_cycle.clone(), vec![(at(8, 0), at(12, 0))]);

        let (agg, _) = fx.aggregate(&[run(235)]).await;

        assert_eq!(
            fx.writer.get(&fx.paths.shift_run_time),
            Some(TagValue::Float(agg.run_minutes))
        );
        assert_eq!(
            fx.writer.get(&fx.paths.expected_parts),
            Some(TagValue::Int(235))
        );
        assert_eq!(fx.writer.get(&fx.paths.parts_complete), Some(TagValue::Int(0)));
    }

    #[tokio::test]
    async fn resolves_active_recipe_through_reference_store() {
        let fx = Fixture::new();
        fx.calc.set_current(
            fx.paths.active_recipe.clone(),
            TagValue::Text("Widget".to_string()),
        );
        fx.references.set_rows(
            "Machine 1",
            vec![ReferenceRecord {
                recipe: "Widget".to_string(),
                setup_time_minutes: 10.0,
                cycle_target_minutes: 2.0,
            }],
        );

        let (_, active) = fx.aggregate(&[]).await;
        let active = active.unwrap();
        assert_eq!(active.recipe, "Widget");
        assert_eq!(active.machine, "Machine 1");
        assert!((active.cycle_target_minutes - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn signal_failure_degrades_to_zero_and_reports() {
        let fx = Fixture::new();
        fx.calc.fail_path(fx.paths.cycle_done.clone());

        let (agg, _) = fx.aggregate(&[run(100)]).await;

        assert_eq!(agg.parts_complete, 0);
        let stages: Vec<_> = fx.reporter.reports().iter().map(|r| r.stage.clone()).collect();
        assert!(stages.contains(&"aggregator.parts_complete".to_string()));
    }
}
