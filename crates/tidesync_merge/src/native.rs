//! Last-writer-wins merging of header-tagged entries.
//!
//! Every stored value carries a [`header`] with the time of its last
//! modification. For each key, the pair `(timestamp, value)` with the
//! largest value under the order below is kept:
//!
//! 1. a later timestamp wins;
//! 2. at equal timestamps the lexicographically *smaller* value wins;
//! 3. at equal timestamps and values a tombstone wins over a live entry.
//!
//! Because this is a total order on what gets compared, any instance that
//! has seen the same set of writes ends up with the same value,
//! regardless of the order or grouping in which it received them.

use crate::error::{MergeError, MergeResult};
use crate::iterator::SyncIterator;
use std::cmp::Ordering;
use tidesync_codec::header::{self, Flags};
use tidesync_codec::snapshot::DELETED_FLAG_VERSION;
use tidesync_codec::Entry;

/// Merges snapshot entries into a header-aware table.
#[derive(Debug)]
pub struct NativeIterator<'a> {
    table: String,
    entries: &'a [Entry],
    pos: usize,
    txn_id: u64,
    default_timestamp: u64,
    deleted_cutoff: u64,
    legacy_deletes: bool,
    buf: Vec<u8>,
}

impl<'a> NativeIterator<'a> {
    /// Creates an iterator over `entries`, which must be sorted by key.
    ///
    /// `txn_id` is written into every header this iterator produces.
    pub fn new(table: impl Into<String>, entries: &'a [Entry], txn_id: u64) -> Self {
        Self {
            table: table.into(),
            entries,
            pos: 0,
            txn_id,
            default_timestamp: 0,
            deleted_cutoff: 0,
            legacy_deletes: false,
            buf: Vec::new(),
        }
    }

    /// Timestamp used for entries without one and for tombstones created
    /// by [`SyncIterator::clean`].
    #[must_use]
    pub fn with_default_timestamp(mut self, timestamp: u64) -> Self {
        self.default_timestamp = timestamp;
        self
    }

    /// Tombstones older than `cutoff` are not inserted for absent keys.
    #[must_use]
    pub fn with_deleted_cutoff(mut self, cutoff: u64) -> Self {
        self.deleted_cutoff = cutoff;
        self
    }

    /// Declares the snapshot format the entries come from.
    ///
    /// Formats older than [`DELETED_FLAG_VERSION`] mark deletions with an
    /// empty value instead of a flag.
    #[must_use]
    pub fn with_format_version(mut self, version: u32) -> Self {
        self.legacy_deletes = version < DELETED_FLAG_VERSION;
        self
    }

    fn current(&self) -> MergeResult<&'a Entry> {
        let entries: &'a [Entry] = self.entries;
        self.pos
            .checked_sub(1)
            .and_then(|i| entries.get(i))
            .ok_or(MergeError::NotPositioned)
    }

    fn is_deleted(&self, entry: &Entry) -> bool {
        Flags::from_byte(entry.flags).is_deleted() || (self.legacy_deletes && entry.value.is_empty())
    }

    fn write(&mut self, timestamp: u64, deleted: bool, value: &[u8]) -> &[u8] {
        self.buf.clear();
        let flags = if deleted { Flags::DELETED } else { Flags::NONE };
        header::write_basic(&mut self.buf, timestamp, self.txn_id, flags);
        if !deleted {
            self.buf.extend_from_slice(value);
        }
        &self.buf
    }
}

/// Decides whether `(new_ts, new_value, new_deleted)` replaces the stored
/// `(old_ts, old_value, old_deleted)`.
pub(crate) fn incoming_wins(
    new_ts: u64,
    new_value: &[u8],
    new_deleted: bool,
    old_ts: u64,
    old_value: &[u8],
    old_deleted: bool,
) -> bool {
    match new_ts.cmp(&old_ts) {
        Ordering::Less => false,
        Ordering::Greater => true,
        // Smaller value wins the tie; equal values prefer the tombstone.
        Ordering::Equal => match new_value.cmp(old_value) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => new_deleted && !old_deleted,
        },
    }
}

impl SyncIterator for NativeIterator<'_> {
    fn next(&mut self) -> MergeResult<Option<&[u8]>> {
        if self.pos > self.entries.len() {
            return Ok(None);
        }
        self.pos += 1;
        Ok(self.entries.get(self.pos - 1).map(|e| e.key.as_ref()))
    }

    fn merge<'b>(&'b mut self, old: Option<&'b [u8]>) -> MergeResult<Option<&'b [u8]>> {
        let entry = self.current()?;
        let deleted = self.is_deleted(entry);
        let value: &[u8] = if deleted { &[] } else { &entry.value[..] };

        let Some(old) = old else {
            let ts = if entry.timestamp == 0 {
                self.default_timestamp
            } else {
                entry.timestamp
            };
            if deleted && ts < self.deleted_cutoff {
                return Ok(None);
            }
            return Ok(Some(self.write(ts, deleted, value)));
        };

        let (old_header, old_value) =
            header::parse(old).map_err(|e| MergeError::header(&self.table, &entry.key, e))?;
        let old_deleted = old_header.is_deleted();

        let mut ts = entry.timestamp;
        if ts == 0 {
            if deleted == old_deleted && value == old_value {
                return Ok(Some(old));
            }
            ts = self.default_timestamp;
        }

        if incoming_wins(ts, value, deleted, old_header.timestamp, old_value, old_deleted) {
            Ok(Some(self.write(ts, deleted, value)))
        } else {
            Ok(Some(old))
        }
    }

    fn clean<'b>(&'b mut self, old: &'b [u8]) -> MergeResult<Option<&'b [u8]>> {
        let (old_header, _) = header::parse(old).map_err(|e| MergeError::header(&self.table, b"", e))?;
        if old_header.is_deleted() {
            return Ok(Some(old));
        }
        let ts = self.default_timestamp;
        Ok(Some(self.write(ts, true, &[])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkTable;
    use crate::strategy::Strategy;
    use bytes::Bytes;
    use tidesync_core::{Env, EnvConfig, TableFlags, Txn};

    fn stored(ts: u64, value: &[u8], deleted: bool) -> Vec<u8> {
        let flags = if deleted { Flags::DELETED } else { Flags::NONE };
        let mut out = Vec::new();
        header::write_basic(&mut out, ts, 1, flags);
        out.extend_from_slice(value);
        out
    }

    fn merged(entry: Entry, old: Option<&[u8]>) -> Option<(u64, Vec<u8>, bool)> {
        let entries = [entry];
        let mut it = NativeIterator::new("t", &entries, 9).with_default_timestamp(1000);
        it.next().unwrap();
        it.merge(old).unwrap().map(|v| {
            let (h, app) = header::parse(v).unwrap();
            (h.timestamp, app.to_vec(), h.is_deleted())
        })
    }

    #[test]
    fn tie_break_prefers_smaller_value() {
        let old = stored(30, b"bbb", false);
        assert_eq!(
            merged(Entry::new(&b"aaa"[..], &b"aaa"[..], 30, 0), Some(&old[..])),
            Some((30, b"aaa".to_vec(), false))
        );
        assert_eq!(
            merged(Entry::new(&b"aaa"[..], &b"ccc"[..], 30, 0), Some(&old[..])),
            Some((30, b"bbb".to_vec(), false))
        );
    }

    #[test]
    fn older_updates_are_rejected() {
        let old = stored(30, b"zzz", false);
        assert_eq!(
            merged(Entry::new(&b"k"[..], &b"aaa"[..], 29, 0), Some(&old[..])),
            Some((30, b"zzz".to_vec(), false))
        );
        assert_eq!(
            merged(Entry::new(&b"k"[..], &b"zzz2"[..], 31, 0), Some(&old[..])),
            Some((31, b"zzz2".to_vec(), false))
        );
    }

    #[test]
    fn deleted_cutoff_suppresses_old_tombstones() {
        let entries = [
            Entry::new(&b"a"[..], Bytes::new(), 5, 1),
            Entry::new(&b"b"[..], Bytes::new(), 50, 1),
        ];
        let mut it = NativeIterator::new("t", &entries, 1).with_deleted_cutoff(10);
        it.next().unwrap();
        assert_eq!(it.merge(None).unwrap(), None);
        it.next().unwrap();
        let (h, rest) = header::parse(it.merge(None).unwrap().unwrap()).unwrap();
        assert!(h.is_deleted());
        assert_eq!(h.timestamp, 50);
        assert!(rest.is_empty());
    }

    #[test]
    fn missing_timestamp_keeps_unchanged_values() {
        let old = stored(30, b"same", false);
        let entry = Entry::new(&b"k"[..], &b"same"[..], 0, 0);
        assert_eq!(merged(entry, Some(&old[..])), Some((30, b"same".to_vec(), false)));

        let entry = Entry::new(&b"k"[..], &b"other"[..], 0, 0);
        assert_eq!(merged(entry, Some(&old[..])), Some((1000, b"other".to_vec(), false)));

        let entry = Entry::new(&b"k"[..], &b"new"[..], 0, 0);
        assert_eq!(merged(entry, None), Some((1000, b"new".to_vec(), false)));
    }

    #[test]
    fn legacy_empty_value_is_a_delete() {
        let entries = [Entry::new(&b"k"[..], Bytes::new(), 40, 0)];
        let old = stored(30, b"v", false);
        let mut it = NativeIterator::new("t", &entries, 1).with_format_version(1);
        it.next().unwrap();
        let (h, _) = header::parse(it.merge(Some(&old[..])).unwrap().unwrap()).unwrap();
        assert!(h.is_deleted());

        let mut it = NativeIterator::new("t", &entries, 1).with_format_version(2);
        it.next().unwrap();
        let (h, app) = header::parse(it.merge(Some(&old[..])).unwrap().unwrap()).unwrap();
        assert!(!h.is_deleted());
        assert!(app.is_empty());
    }

    #[test]
    fn tombstone_beats_empty_value_at_equal_time() {
        let live = stored(30, b"", false);
        let dead = stored(30, b"", true);
        assert_eq!(
            merged(Entry::new(&b"k"[..], Bytes::new(), 30, 1), Some(&live[..])),
            Some((30, Vec::new(), true))
        );
        assert_eq!(
            merged(Entry::new(&b"k"[..], Bytes::new(), 30, 0), Some(&dead[..])),
            Some((30, Vec::new(), true))
        );
    }

    #[test]
    fn clean_turns_live_entries_into_tombstones() {
        let entries: [Entry; 0] = [];
        let mut it = NativeIterator::new("t", &entries, 3).with_default_timestamp(77);
        let live = stored(30, b"v", false);
        let (h, rest) = header::parse(it.clean(&live).unwrap().unwrap()).unwrap();
        assert!(h.is_deleted());
        assert_eq!((h.timestamp, h.txn_id), (77, 3));
        assert!(rest.is_empty());

        let dead = stored(30, b"", true);
        assert_eq!(it.clean(&dead).unwrap(), Some(&dead[..]));
    }

    #[test]
    fn bad_stored_header_is_reported() {
        let entries = [Entry::new(&b"k"[..], &b"v"[..], 1, 0)];
        let mut it = NativeIterator::new("t", &entries, 1);
        it.next().unwrap();
        assert!(matches!(
            it.merge(Some(b"short")),
            Err(MergeError::Header { .. })
        ));
    }

    #[test]
    fn merge_before_next_is_an_error() {
        let entries = [Entry::new(&b"k"[..], &b"v"[..], 1, 0)];
        let mut it = NativeIterator::new("t", &entries, 1);
        assert!(matches!(it.merge(None), Err(MergeError::NotPositioned)));
    }

    #[test]
    fn iter_update_applies_lww_to_a_table() {
        let env = Env::open(EnvConfig::default());
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        txn.put("t", b"a", &stored(10, b"keep", false)).unwrap();
        txn.put("t", b"b", &stored(10, b"old", false)).unwrap();
        txn.put("t", b"c", &stored(10, b"gone", false)).unwrap();

        let entries = [
            Entry::new(&b"a"[..], &b"stale"[..], 5, 0),
            Entry::new(&b"b"[..], &b"new"[..], 20, 0),
        ];
        let id = txn.id().as_u64();
        let mut source = NativeIterator::new("t", &entries, id).with_default_timestamp(99);
        let mut sink = SinkTable::open(&mut txn, "t").unwrap();
        Strategy::IterUpdate.apply(&mut sink, &mut source).unwrap();

        let get = |k: &[u8]| {
            let raw = txn.get("t", k).unwrap().unwrap();
            let (h, app) = header::parse(&raw).unwrap();
            (h.timestamp, app.to_vec(), h.is_deleted())
        };
        assert_eq!(get(b"a"), (10, b"keep".to_vec(), false));
        assert_eq!(get(b"b"), (20, b"new".to_vec(), false));
        assert_eq!(get(b"c"), (99, Vec::new(), true));
    }
}
