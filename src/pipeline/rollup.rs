//! Stage 7: system rollup
//!
//! Rolls a system's machines up to one scorecard: the system-scoped
//! completion count against a simplified capacity estimate, plus the
//! pace-setter: the active recipe with the highest cycle target across the
//! system's machines, which operator displays use as the capacity reference.
//!
//! The capacity estimate is deliberately NOT the sum of per-machine expected
//! parts: the system is scored against `round(window hours × 60)`,
//! independent of recipe detail, so machine-level and system-level "expected
//! parts" remain distinct policies.

use crate::io::{
    with_timeout, CalcKind, CalcReader, ErrorReport, ErrorReporter, TagValue, TagWriter,
};
use crate::shift::{round_to, ShiftWindow};
use crate::tags::SystemTagPaths;
use crate::types::{ActiveRecipe, SystemAggregate};
use std::time::Duration;
use tracing::debug;

/// Select the pace-setter: the highest cycle target wins; ties keep the
/// first machine in iteration order.
pub fn pace_setter(active_recipes: &[ActiveRecipe]) -> Option<&ActiveRecipe> {
    let mut best: Option<&ActiveRecipe> = None;
    for candidate in active_recipes {
        match best {
            Some(current) if candidate.cycle_target_minutes <= current.cycle_target_minutes => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Compute the system scorecard and write the system tags.
pub async fn roll_up_system(
    calc: &dyn CalcReader,
    writer: &dyn TagWriter,
    reporter: &dyn ErrorReporter,
    system: &str,
    paths: &SystemTagPaths,
    window: ShiftWindow,
    active_recipes: &[ActiveRecipe],
    query_timeout: Duration,
) -> SystemAggregate {
    let setter = pace_setter(active_recipes).cloned();

    if let Some(ref recipe) = setter {
        match serde_json::to_string(recipe) {
            Ok(json) => {
                write_tag(
                    writer,
                    reporter,
                    system,
                    &paths.active_recipe_info,
                    TagValue::Text(json),
                    query_timeout,
                )
                .await;
            }
            Err(e) => {
                reporter.report(ErrorReport::new(
                    "rollup.pace_setter_serialize",
                    system,
                    format!("pace-setter serialization failed: {e}"),
                ));
            }
        }
    }

    // System-scoped completion counter, intentionally not the sum of the
    // per-machine counts.
    let total_parts_complete = match with_timeout(
        query_timeout,
        calc.calc(&paths.cycle_done, CalcKind::CountOn, window.start, window.end),
    )
    .await
    {
        Ok(Some(count)) if count.is_finite() => count as i64,
        Ok(_) => 0,
        Err(e) => {
            reporter.report(ErrorReport::new(
                "rollup.parts_complete",
                system,
                format!("system CountOn failed: {e}"),
            ));
            0
        }
    };

    let total_expected_parts = round_to(window.hours() * 60.0, 0) as i64;
    let score_percent = if total_expected_parts != 0 {
        round_to(
            total_parts_complete as f64 / total_expected_parts as f64 * 100.0,
            0,
        ) as i64
    } else {
        0
    };

    debug!(
        system,
        total_parts_complete, total_expected_parts, score_percent, "System rollup computed"
    );

    write_tag(
        writer,
        reporter,
        system,
        &paths.completed_parts,
        TagValue::Int(total_parts_complete),
        query_timeout,
    )
    .await;
    write_tag(
        writer,
        reporter,
        system,
        &paths.expected_parts,
        TagValue::Int(total_expected_parts),
        query_timeout,
    )
    .await;
    write_tag(
        writer,
        reporter,
        system,
        &paths.scorecard_value,
        TagValue::Int(score_percent),
        query_timeout,
    )
    .await;

    SystemAggregate {
        system: system.to_string(),
        total_parts_complete,
        total_expected_parts,
        score_percent,
        pace_setter: setter,
    }
}

async fn write_tag(
    writer: &dyn TagWriter,
    reporter: &dyn ErrorReporter,
    system: &str,
    path: &str,
    value: TagValue,
    timeout: Duration,
) {
    if let Err(e) = with_timeout(timeout, writer.write(path, value)).await {
        reporter.report(ErrorReport::new(
            "rollup.tag_write",
            system,
            format!("write to {path} rejected: {e}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{CollectingReporter, InMemoryCalc, InMemoryTagWriter};
    use chrono::{DateTime, TimeZone, Utc};

    const ROOT: &str = "[SCADA Overview]Performance Tracking/";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, h, m, 0).single().unwrap()
    }

    fn active(machine: &str, cycle_target: f64) -> ActiveRecipe {
        ActiveRecipe {
            machine: machine.to_string(),
            recipe: format!("{machine} recipe"),
            setup_time_minutes: 5.0,
            cycle_target_minutes: cycle_target,
        }
    }

    #[test]
    fn pace_setter_takes_highest_cycle_target() {
        let recipes = [active("M1", 2.0), active("M2", 4.0), active("M3", 3.0)];
        assert_eq!(pace_setter(&recipes).map(|r| r.machine.as_str()), Some("M2"));
    }

    #[test]
    fn pace_setter_tie_keeps_first_machine() {
        let recipes = [active("M1", 4.0), active("M2", 4.0)];
        assert_eq!(pace_setter(&recipes).map(|r| r.machine.as_str()), Some("M1"));
    }

    #[test]
    fn pace_setter_of_empty_list_is_none() {
        assert!(pace_setter(&[]).is_none());
    }

    #[tokio::test]
    async fn rollup_scores_against_hourly_capacity() {
        let calc = InMemoryCalc::new();
        let paths = SystemTagPaths::new(ROOT, "Line A");
        // 240 system completions over an 8-hour window.
        let spans: Vec<_> = (0..240)
            .map(|i| {
                let on = at(8, 0) + chrono::Duration::seconds(i * 100);
                (on, on + chrono::Duration::seconds(5))
            })
            .collect();
        calc.set_on_spans(paths.cycle_done.clone(), spans);
        let writer = InMemoryTagWriter::new();
        let reporter = CollectingReporter::new();

        let agg = roll_up_system(
            &calc,
            &writer,
            &reporter,
            "Line A",
            &paths,
            ShiftWindow::new(at(8, 0), at(16, 0)),
            &[active("M1", 2.0)],
            Duration::from_secs(5),
        )
        .await;

        // Capacity: 8 h × 60 = 480; score: round(240/480 × 100) = 50.
        assert_eq!(agg.total_parts_complete, 240);
        assert_eq!(agg.total_expected_parts, 480);
        assert_eq!(agg.score_percent, 50);
        assert_eq!(writer.get(&paths.scorecard_value), Some(TagValue::Int(50)));
        assert_eq!(writer.get(&paths.completed_parts), Some(TagValue::Int(240)));
    }

    #[tokio::test]
    async fn zero_length_window_scores_zero() {
        let calc = InMemoryCalc::new();
        let paths = SystemTagPaths::new(ROOT, "Line A");
        let writer = InMemoryTagWriter::new();
        let reporter = CollectingReporter::new();

        let agg = roll_up_system(
            &calc,
            &writer,
            &reporter,
            "Line A",
            &paths,
            ShiftWindow::new(at(8, 0), at(8, 0)),
            &[],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(agg.total_expected_parts, 0);
        assert_eq!(agg.score_percent, 0);
    }

    #[tokio::test]
    async fn pace_setter_json_written_to_recipe_info_tag() {
        let calc = InMemoryCalc::new();
        let paths = SystemTagPaths::new(ROOT, "Line A");
        let writer = InMemoryTagWriter::new();
        let reporter = CollectingReporter::new();

        roll_up_system(
            &calc,
            &writer,
            &reporter,
            "Line A",
            &paths,
            ShiftWindow::new(at(8, 0), at(16, 0)),
            &[active("M1", 2.0)],
            Duration::from_secs(5),
        )
        .await;

        match writer.get(&paths.active_recipe_info) {
            Some(TagValue::Text(json)) => {
                let parsed: ActiveRecipe = serde_json::from_str(&json).unwrap();
                assert_eq!(parsed.machine, "M1");
            }
            other => panic!("expected JSON recipe info, got {other:?}"),
        }
    }
}
