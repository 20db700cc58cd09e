use collector_core::resilience::SourceBudget;
use proptest::prelude::*;

/// Strategy for generating valid source budgets
pub fn source_budget_strategy() -> impl Strategy<Value = SourceBudget> {
    (0.5f64..50.0, 1u32..20, 1usize..8).prop_map(|(rate, burst, max_concurrent)| {
        SourceBudget::new(rate, burst, max_concurrent)
    })
}

/// Strategy for generating request times as millisecond offsets, sorted
pub fn request_offsets_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5_000, 1..200).prop_map(|mut offsets| {
        offsets.sort_unstable();
        offsets
    })
}
