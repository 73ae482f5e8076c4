//! Stage 2: change events → shift-clipped intervals
//!
//! Each change event opens a closed-open interval that ends where the next
//! event starts; the last interval ends at the window end. An interval that
//! was already active when the window opened is clipped to the window start;
//! intervals that ended before the window (or clip to nothing) are dropped.

use crate::shift::ShiftWindow;
use crate::types::{ChangeEvent, Interval};

/// Build the shift's recipe intervals from compacted change events.
///
/// Produces zero or more intervals, contiguous and non-overlapping within
/// the window; given at least one event at or before the window start, the
/// interval durations sum to the window length.
pub fn clip_to_window(events: &[ChangeEvent], window: ShiftWindow) -> Vec<Interval> {
    let mut intervals = Vec::with_capacity(events.len());

    for (i, event) in events.iter().enumerate() {
        let mut start = event.observed_at;
        let end = events
            .get(i + 1)
            .map_or(window.end, |next| next.observed_at);

        // Active across the window open: clip to the boundary.
        if start < window.start && window.start <= end {
            start = window.start;
        }
        // Ended before the window opened, or clipped to zero length.
        if start < window.start || start >= end {
            continue;
        }
        intervals.push(Interval {
            recipe: event.recipe.clone(),
            start,
            end,
        });
    }

    intervals
}
