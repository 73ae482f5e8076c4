//! Shift window computation and duration helpers
//!
//! A shift is a fixed reporting window bounded by configured start-of-day
//! hours (e.g. `[6, 8, 18]`). Each reporting cycle covers
//! `[current shift start, now)`; the window grows as the shift progresses
//! and resets at the next configured boundary.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The closed-open reporting window `[start, end)` for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window length in minutes, rounded to 2 decimals.
    pub fn minutes(&self) -> f64 {
        minutes_between(self.start, self.end)
    }

    /// Window length in whole hours (fractional).
    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Compute the most recent shift start at or before `now`.
///
/// `start_hours` are whole hours of day (0-23). If `now` falls before the
/// earliest start hour today, the shift began at the latest start hour
/// yesterday. Hours outside 0-23 are ignored; an empty list falls back to
/// midnight today.
pub fn current_shift_start(now: DateTime<Utc>, start_hours: &[u32]) -> DateTime<Utc> {
    let mut hours: Vec<u32> = start_hours.iter().copied().filter(|h| *h < 24).collect();
    hours.sort_unstable();

    let midnight = truncate_to_midnight(now);
    if hours.is_empty() {
        return midnight;
    }

    let elapsed = hours.iter().rev().find(|&&h| h <= now.hour());
    match elapsed {
        Some(&h) => midnight + Duration::hours(i64::from(h)),
        // Before the first boundary of the day: the shift started at the
        // last boundary of the previous day.
        None => {
            let last = hours[hours.len() - 1];
            midnight - Duration::days(1) + Duration::hours(i64::from(last))
        }
    }
}

/// Minutes between two timestamps, rounded to 2 decimal places.
///
/// Negative spans round the same way (the caller decides whether a negative
/// duration is an error).
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds() as f64;
    round_to(millis / 60_000.0, 2)
}

/// Convert a duration in seconds to minutes, rounded to 2 decimal places.
pub fn seconds_to_minutes(seconds: f64) -> f64 {
    round_to(seconds / 60.0, 2)
}

/// Round to `places` decimal places (half away from zero).
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10_f64.powi(places as i32);
    (value * factor).round() / factor
}

fn truncate_to_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    match t.date_naive().and_hms_opt(0, 0, 0) {
        Some(naive) => Utc.from_utc_datetime(&naive),
        None => t,
    }
}
