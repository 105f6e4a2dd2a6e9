//! Property-based test generators using proptest.
//!
//! Keys come from a small alphabet and timestamps from a small range so
//! that generated writes collide often, which is where merge behavior is
//! interesting.

use crate::fixtures::entry;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tidesync_codec::Entry;

/// Strategy for generating short keys over a small alphabet.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(vec![b'a', b'b', b'c', 0u8]), 1..4)
}

/// Strategy for generating non-empty values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..6)
}

/// Strategy for generating timestamps that tie often.
pub fn timestamp_strategy() -> impl Strategy<Value = u64> {
    1u64..20
}

/// Strategy for generating a single write: `(key, value, timestamp, deleted)`.
pub fn write_strategy() -> impl Strategy<Value = (Vec<u8>, Vec<u8>, u64, bool)> {
    (
        key_strategy(),
        value_strategy(),
        timestamp_strategy(),
        prop::bool::weighted(0.2),
    )
}

/// Strategy for generating a set of distinct keys in ascending order.
pub fn sorted_keys_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::btree_set(key_strategy(), 0..max).prop_map(|set| set.into_iter().collect())
}

/// Strategy for generating a snapshot table's entries: sorted, one per key.
pub fn sorted_entries_strategy(max: usize) -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec(write_strategy(), 0..max).prop_map(|writes| to_entries(&writes))
}

/// Collapses writes into sorted snapshot entries, the last write per key
/// winning.
pub fn to_entries(writes: &[(Vec<u8>, Vec<u8>, u64, bool)]) -> Vec<Entry> {
    let mut by_key = BTreeMap::new();
    for (key, value, ts, deleted) in writes {
        by_key.insert(key.clone(), entry(key, value, *ts, *deleted));
    }
    by_key.into_values().collect()
}
