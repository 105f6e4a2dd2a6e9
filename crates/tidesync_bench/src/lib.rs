//! Benchmark utilities.

use bytes::Bytes;
use tidesync_codec::{Entry, Flags, Snapshot, SnapshotMeta, SnapshotTable};
use tidesync_core::{Env, EnvConfig, TableFlags, Txn, WriteTxn};
use tidesync_merge::{NativeIterator, SinkTable, Strategy};

/// Deterministic payload of `size` bytes derived from `seed`.
pub fn payload(seed: u64, size: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..size)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// `count` sorted entries with big-endian keys.
///
/// Every `step`-th key is skipped so two sets built with different steps
/// overlap only partly. Every tenth entry is a tombstone.
pub fn entries(count: usize, step: usize, timestamp: u64, size: usize) -> Vec<Entry> {
    (0..count as u64)
        .filter(|i| step == 0 || i % step as u64 != 0)
        .map(|i| {
            let key = Bytes::copy_from_slice(&i.to_be_bytes());
            if i % 10 == 0 {
                Entry::new(key, Bytes::new(), timestamp, Flags::DELETED.as_byte())
            } else {
                Entry::new(key, payload(i, size), timestamp, Flags::NONE.as_byte())
            }
        })
        .collect()
}

/// A snapshot with `tables` tables of `count` entries each.
pub fn snapshot(tables: usize, count: usize, size: usize) -> Snapshot {
    let mut snapshot = Snapshot::new(SnapshotMeta {
        instance_id: "bench".to_string(),
        generation_id: "bench".to_string(),
        hostname: "localhost".to_string(),
        database_name: "bench".to_string(),
        source_txn_id: 1,
        timestamp: 1,
    });
    for t in 0..tables {
        let mut table = SnapshotTable::new(format!("table_{t}"), 0);
        table.entries = entries(count, 0, 1_000, size);
        snapshot.tables.push(table);
    }
    snapshot
}

/// An environment holding one empty table.
pub fn empty_env(table: &str) -> Env {
    let env = Env::open(EnvConfig::default());
    let mut txn = env.begin_write();
    txn.create_table(table, TableFlags::NONE)
        .expect("Failed to create table");
    txn.commit().expect("Failed to commit");
    env
}

/// Merges `entries` into `table` with `strategy` inside `txn`.
pub fn merge(txn: &mut WriteTxn<'_>, table: &str, entries: &[Entry], strategy: Strategy) {
    let txn_id = txn.id().as_u64();
    let mut sink = SinkTable::open(txn, table).expect("Failed to open sink");
    let mut source = NativeIterator::new(table, entries, txn_id);
    strategy
        .apply(&mut sink, &mut source)
        .expect("Failed to merge");
}

/// An environment whose `table` already holds `entries`.
pub fn seeded_env(table: &str, entries: &[Entry]) -> Env {
    let env = empty_env(table);
    let mut txn = env.begin_write();
    merge(&mut txn, table, entries, Strategy::Append);
    txn.commit().expect("Failed to commit");
    env
}
