//! Property tests for merge-join and last-writer-wins convergence.

use proptest::prelude::*;
use std::collections::BTreeSet;
use tidesync_codec::Entry;
use tidesync_core::{Env, EnvConfig, TableFlags, Txn};
use tidesync_merge::{
    merge_join, MergeResult, NativeIterator, SinkTable, Strategy, SyncIterator,
};
use tidesync_testkit::prelude::*;

/// Source of plain key/value pairs.
struct Pairs {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl SyncIterator for Pairs {
    fn next(&mut self) -> MergeResult<Option<&[u8]>> {
        self.pos += 1;
        Ok(self.pairs.get(self.pos - 1).map(|(k, _)| k.as_slice()))
    }

    fn merge<'a>(&'a mut self, _old: Option<&'a [u8]>) -> MergeResult<Option<&'a [u8]>> {
        Ok(self.pairs.get(self.pos - 1).map(|(_, v)| v.as_slice()))
    }

    fn clean<'a>(&'a mut self, _old: &'a [u8]) -> MergeResult<Option<&'a [u8]>> {
        Ok(None)
    }
}

fn apply_native(env: &Env, entries: &[Entry]) {
    let mut txn = env.begin_write();
    let id = txn.id().as_u64();
    let mut source = NativeIterator::new("t", entries, id);
    let mut sink = SinkTable::open(&mut txn, "t").unwrap();
    Strategy::IterUpdate.apply(&mut sink, &mut source).unwrap();
    txn.commit().unwrap();
}

type Write = (Vec<u8>, u64, bool);

/// True if `a` replaces `b` under last-writer-wins with the value tie-break.
fn beats(a: &Write, b: &Write) -> bool {
    let value = |w: &Write| if w.2 { Vec::new() } else { w.0.clone() };
    match a.1.cmp(&b.1) {
        std::cmp::Ordering::Equal => match value(a).cmp(&value(b)) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.2 && !b.2,
        },
        other => other == std::cmp::Ordering::Greater,
    }
}

fn final_state(writes: &[Write]) -> Vec<TaggedRow> {
    let env = env_with_table("t");
    for (value, ts, deleted) in writes {
        apply_native(&env, &[entry(b"k", value, *ts, *deleted)]);
    }
    read_tagged(&env, "t")
}

proptest! {
    #[test]
    fn merge_join_visits_union_once_in_order(
        table in sorted_keys_strategy(12),
        source in sorted_keys_strategy(12),
    ) {
        let env = Env::open(EnvConfig::default());
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        for k in &table {
            txn.put("t", k, b"v").unwrap();
        }
        let mut iter = Pairs {
            pairs: source.iter().map(|k| (k.clone(), b"v".to_vec())).collect(),
            pos: 0,
        };
        let mut sink = SinkTable::open(&mut txn, "t").unwrap();
        let mut visited = Vec::new();
        merge_join(&mut sink, &mut iter, |_, _, step| {
            let key = step.source_key.or(step.sink.map(|(k, _)| k)).unwrap();
            if let (Some(a), Some((b, _))) = (step.source_key, step.sink) {
                assert_eq!(a, b);
            }
            visited.push(key.to_vec());
            Ok(())
        }).unwrap();

        let union: BTreeSet<Vec<u8>> = table.iter().chain(source.iter()).cloned().collect();
        prop_assert_eq!(visited, union.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn iter_put_makes_table_equal_to_source(
        table in sorted_keys_strategy(12),
        source in sorted_keys_strategy(12),
    ) {
        let env = Env::open(EnvConfig::default());
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        for k in &table {
            txn.put("t", k, b"old").unwrap();
        }
        let pairs: Vec<_> = source.iter().map(|k| (k.clone(), k.clone())).collect();
        let mut iter = Pairs { pairs: pairs.clone(), pos: 0 };
        let mut sink = SinkTable::open(&mut txn, "t").unwrap();
        Strategy::select(sink.is_empty().unwrap()).apply(&mut sink, &mut iter).unwrap();
        txn.commit().unwrap();
        prop_assert_eq!(read_plain(&env, "t"), pairs);
    }

    #[test]
    fn lww_converges_in_any_order(
        writes in prop::collection::vec(
            (value_strategy(), timestamp_strategy(), prop::bool::weighted(0.3)),
            1..8,
        ),
    ) {
        let forward = final_state(&writes);
        let mut reversed = writes.clone();
        reversed.reverse();
        let mut sorted = writes.clone();
        sorted.sort();

        prop_assert_eq!(&final_state(&reversed), &forward);
        prop_assert_eq!(&final_state(&sorted), &forward);

        let mut winner = &writes[0];
        for w in &writes[1..] {
            if beats(w, winner) {
                winner = w;
            }
        }
        prop_assert_eq!(forward.len(), 1);
        prop_assert_eq!(forward[0].timestamp, winner.1);
        prop_assert_eq!(forward[0].deleted, winner.2);
        if !winner.2 {
            prop_assert_eq!(&forward[0].value, &winner.0);
        }
    }

    #[test]
    fn snapshots_merge_commutatively(
        a in sorted_entries_strategy(10),
        b in sorted_entries_strategy(10),
    ) {
        // A full-table merge tombstones keys the source lacks, so restrict
        // both snapshots to the keys they share.
        let both: BTreeSet<Vec<u8>> = a.iter().map(|e| e.key.to_vec())
            .filter(|k| b.iter().any(|e| e.key[..] == k[..]))
            .collect();
        let b_only: Vec<Entry> = b.iter()
            .filter(|e| both.contains(&e.key[..]))
            .cloned()
            .collect();
        let a_only: Vec<Entry> = a.iter()
            .filter(|e| both.contains(&e.key[..]))
            .cloned()
            .collect();

        let x = env_with_table("t");
        apply_native(&x, &a_only);
        apply_native(&x, &b_only);
        let y = env_with_table("t");
        apply_native(&y, &b_only);
        apply_native(&y, &a_only);
        prop_assert_eq!(read_tagged(&x, "t"), read_tagged(&y, "t"));
    }
}

#[test]
fn append_then_update_keeps_sorted_table() {
    let env = env_with_table("t");
    let first = vec![entry(b"aaa", b"1", 10, false), entry(b"bbbb", b"2", 10, false)];
    {
        let mut txn = env.begin_write();
        let id = txn.id().as_u64();
        let mut source = NativeIterator::new("t", &first, id);
        let mut sink = SinkTable::open(&mut txn, "t").unwrap();
        let strategy = Strategy::select(sink.is_empty().unwrap());
        assert_eq!(strategy, Strategy::Append);
        strategy.apply(&mut sink, &mut source).unwrap();
        txn.commit().unwrap();
    }
    apply_native(&env, &[entry(b"aaa", b"0", 20, false), entry(b"bbbb", b"", 20, true)]);
    let rows = read_tagged(&env, "t");
    assert_eq!(rows[0].value, b"0".to_vec());
    assert!(rows[1].deleted);
}
