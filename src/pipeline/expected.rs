//! Stage 5: expected parts per interval
//!
//! `expected = max(floor((duration − setup − idle) / cycle_target), 0)`.
//! The cycle target is a time-per-part figure, so a zero or missing target
//! makes the division degenerate: that interval yields 0 and is reported,
//! never aborting the batch.

use crate::io::{ErrorReport, ErrorReporter};
use crate::types::EnrichedInterval;

/// Fill `expected_parts` on each interval.
pub fn fill_expected_parts(
    intervals: &mut [EnrichedInterval],
    scope: &str,
    reporter: &dyn ErrorReporter,
) {
    for interval in intervals.iter_mut() {
        interval.expected_parts = expected_parts(interval, scope, reporter);
    }
}

fn expected_parts(
    interval: &EnrichedInterval,
    scope: &str,
    reporter: &dyn ErrorReporter,
) -> i64 {
    let (Some(setup), Some(cycle_target)) =
        (interval.setup_time_minutes, interval.cycle_target_minutes)
    else {
        reporter.report(ErrorReport::new(
            "expected_parts.reference_missing",
            scope,
            format!("no reference data for recipe {}", interval.recipe),
        ));
        return 0;
    };

    if cycle_target == 0.0 {
        reporter.report(ErrorReport::new(
            "expected_parts.zero_cycle_target",
            scope,
            format!("cycle target is 0 for recipe {}", interval.recipe),
        ));
        return 0;
    }

    let raw = (interval.duration_minutes - setup - interval.idle_time_minutes) / cycle_target;
    (raw.floor() as i64).max(0)
}
