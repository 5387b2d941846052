#![allow(dead_code)]

use proptest::prelude::*;

/// Strategy for the `a` values of a finite input sequence
pub fn record_values_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000i64..1_000, 0..60)
}

/// Strategy for worker pool sizes
pub fn num_workers_strategy() -> impl Strategy<Value = usize> {
    1usize..=5
}

/// Strategy for queue capacities, small enough to exercise back-pressure
pub fn capacity_strategy() -> impl Strategy<Value = usize> {
    1usize..=8
}
