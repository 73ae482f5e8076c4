//! Stage 3: reference join
//!
//! Enriches each interval with the recipe's setup time and cycle target from
//! the reference table. Matching is exact string equality on the recipe
//! name; what happens on a miss is the fallback policy's call.

use crate::types::{
    EnrichedInterval, FallbackPolicy, Interval, ReferenceRecord, DEFAULT_RECIPE_KEY,
};
use std::collections::HashMap;

/// Join intervals against the machine's reference rows.
///
/// Under [`FallbackPolicy::DefaultRow`], a miss takes the `"default"`
/// sentinel row when the table has one; under [`FallbackPolicy::Strict`]
/// (or with no sentinel) the setup/cycle fields stay `None` and downstream
/// calculators skip that interval. Idle time and expected parts are filled
/// by later stages and start at zero here.
pub fn join_references(
    intervals: &[Interval],
    references: &[ReferenceRecord],
    policy: FallbackPolicy,
) -> Vec<EnrichedInterval> {
    let by_recipe: HashMap<&str, &ReferenceRecord> = references
        .iter()
        .map(|record| (record.recipe.as_str(), record))
        .collect();
    let default_row = match policy {
        FallbackPolicy::DefaultRow => by_recipe.get(DEFAULT_RECIPE_KEY).copied(),
        FallbackPolicy::Strict => None,
    };

    intervals
        .iter()
        .map(|interval| {
            let matched = by_recipe
                .get(interval.recipe.as_str())
                .copied()
                .or(default_row);
            EnrichedInterval {
                recipe: interval.recipe.clone(),
                start: interval.start,
                end: interval.end,
                duration_minutes: interval.duration_minutes(),
                setup_time_minutes: matched.map(|r| r.setup_time_minutes),
                cycle_target_minutes: matched.map(|r| r.cycle_target_minutes),
                idle_time_minutes: 0.0,
                expected_parts: 0,
            }
        })
        .collect()
}
