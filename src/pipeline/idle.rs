//! Stage 4: per-interval idle time
//!
//! The idle signal is a binary "powered but not producing" indicator. For
//! each recipe run the cumulative on-duration over `[start, end)` comes from
//! the calculation engine in seconds and is reported in minutes.

use crate::io::{with_timeout, CalcKind, CalcReader, ErrorReport, ErrorReporter};
use crate::shift::seconds_to_minutes;
use crate::types::EnrichedInterval;
use std::time::Duration;

/// Resolve idle minutes for each interval from the idle signal.
///
/// A missing or failed query degrades that interval to 0 idle minutes and
/// files a report; the rest of the batch proceeds.
pub async fn resolve_idle_times(
    intervals: &mut [EnrichedInterval],
    calc: &dyn CalcReader,
    idle_tag_path: &str,
    scope: &str,
    timeout: Duration,
    reporter: &dyn ErrorReporter,
) {
    for interval in intervals.iter_mut() {
        let result = with_timeout(
            timeout,
            calc.calc(idle_tag_path, CalcKind::DurationOn, interval.start, interval.end),
        )
        .await;

        interval.idle_time_minutes = match result {
            Ok(Some(seconds)) => seconds_to_minutes(seconds.max(0.0)),
            Ok(None) => 0.0,
            Err(e) => {
                reporter.report(ErrorReport::new(
                    "idle.duration_on",
                    scope,
                    format!("idle query for {} failed: {e}", interval.recipe),
                ));
                0.0
            }
        };
    }
}
