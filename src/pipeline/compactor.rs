//! Stage 1: run-length compaction of the sampled recipe series
//!
//! The historian returns one sample per storage interval, so an eight-hour
//! run of one recipe arrives as hundreds of identical rows. Compaction keeps
//! only the rows where the recipe actually changed.

use crate::types::{ChangeEvent, Sample};

/// Collapse consecutive identical recipes into change events.
///
/// The first sample always becomes an event; each later sample becomes one
/// only if its recipe differs from the previously emitted event. Empty input
/// yields empty output. Idempotent: compacting a compacted sequence is a
/// no-op.
pub fn compact(samples: &[Sample]) -> Vec<ChangeEvent> {
    let mut events: Vec<ChangeEvent> = Vec::new();
    for sample in samples {
        if events
            .last()
            .is_none_or(|prev| prev.recipe != sample.recipe)
        {
            events.push(ChangeEvent {
                recipe: sample.recipe.clone(),
                observed_at: sample.timestamp,
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 8, m, 0).single().unwrap()
    }

    fn samples(specs: &[(u32, &str)]) -> Vec<Sample> {
        specs.iter().map(|&(m, r)| Sample::new(at(m), r)).collect()
    }

    #[test]
    fn collapses_consecutive_duplicates() {
        let events = compact(&samples(&[(0, "A"), (1, "A"), (2, "A"), (3, "B"), (4, "B"), (5, "A")]));
        let recipes: Vec<_> = events.iter().map(|e| e.recipe.as_str()).collect();
        assert_eq!(recipes, vec!["A", "B", "A"]);
        assert_eq!(events[1].observed_at, at(3));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(compact(&[]).is_empty());
    }

    #[test]
    fn single_sample_is_one_event() {
        let events = compact(&samples(&[(0, "A")]));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn compaction_is_idempotent() {
        let events = compact(&samples(&[(0, "A"), (1, "A"), (2, "B"), (3, "A")]));
        let as_samples: Vec<Sample> = events
            .iter()
            .map(|e| Sample::new(e.observed_at, e.recipe.clone()))
            .collect();
        assert_eq!(compact(&as_samples), events);
    }

    #[test]
    fn no_consecutive_equal_recipes_in_output() {
        let events = compact(&samples(&[
            (0, "A"), (1, "B"), (2, "B"), (3, "B"), (4, "C"), (5, "C"), (6, "A"),
        ]));
        for pair in events.windows(2) {
            assert_ne!(pair[0].recipe, pair[1].recipe);
        }
    }
}
