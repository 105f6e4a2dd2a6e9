//! Test fixtures and environment helpers.
//!
//! Helpers panic on failure; they are meant for tests only.

use bytes::Bytes;
use std::path::Path;
use tempfile::TempDir;
use tidesync_codec::header::{self, Flags};
use tidesync_codec::{Entry, Snapshot, SnapshotMeta, SnapshotTable};
use tidesync_core::{Env, EnvConfig, TableFlags, Txn};
use tidesync_storage::FsStore;

/// Opens an environment with one empty plain table.
pub fn env_with_table(table: &str) -> Env {
    let env = Env::open(EnvConfig::default());
    let mut txn = env.begin_write();
    txn.create_table(table, TableFlags::NONE)
        .expect("Failed to create table");
    txn.commit().expect("Failed to commit");
    env
}

/// Encodes a live header-tagged value.
pub fn tagged(timestamp: u64, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    header::write_basic(&mut out, timestamp, 1, Flags::NONE);
    out.extend_from_slice(value);
    out
}

/// Encodes a tombstone.
pub fn tombstone(timestamp: u64) -> Vec<u8> {
    let mut out = Vec::new();
    header::write_basic(&mut out, timestamp, 1, Flags::DELETED);
    out
}

/// Writes `raw` under `key` in its own transaction, creating the table.
pub fn put_raw(env: &Env, table: &str, key: &[u8], raw: &[u8]) {
    let mut txn = env.begin_write();
    txn.create_table(table, TableFlags::NONE)
        .expect("Failed to create table");
    txn.put(table, key, raw).expect("Failed to put");
    txn.commit().expect("Failed to commit");
}

/// Writes a live header-tagged value.
pub fn put_tagged(env: &Env, table: &str, key: &[u8], timestamp: u64, value: &[u8]) {
    put_raw(env, table, key, &tagged(timestamp, value));
}

/// Writes a tombstone.
pub fn put_tombstone(env: &Env, table: &str, key: &[u8], timestamp: u64) {
    put_raw(env, table, key, &tombstone(timestamp));
}

/// Deletes a key in its own transaction.
pub fn delete_key(env: &Env, table: &str, key: &[u8]) {
    let mut txn = env.begin_write();
    txn.delete(table, key).expect("Failed to delete");
    txn.commit().expect("Failed to commit");
}

/// A decoded row of a header-tagged table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRow {
    /// Key.
    pub key: Vec<u8>,
    /// Header timestamp.
    pub timestamp: u64,
    /// Tombstone flag.
    pub deleted: bool,
    /// Application value.
    pub value: Vec<u8>,
}

/// Reads every `(key, value)` of a table in key order.
pub fn read_plain(env: &Env, table: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    let txn = env.begin_read();
    if !txn.has_table(table) {
        return Vec::new();
    }
    let mut cursor = txn.cursor(table).expect("Failed to open cursor");
    let mut out = Vec::new();
    while let Some(entry) = cursor.next(&txn).expect("Failed to read") {
        out.push(entry);
    }
    out
}

/// Reads and decodes a header-tagged table.
pub fn read_tagged(env: &Env, table: &str) -> Vec<TaggedRow> {
    read_plain(env, table)
        .into_iter()
        .map(|(key, raw)| {
            let (h, value) = header::parse(&raw).expect("Invalid header");
            TaggedRow {
                key,
                timestamp: h.timestamp,
                deleted: h.is_deleted(),
                value: value.to_vec(),
            }
        })
        .collect()
}

/// Live `(key, value)` pairs of a header-tagged table.
pub fn live_values(env: &Env, table: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
    read_tagged(env, table)
        .into_iter()
        .filter(|row| !row.deleted)
        .map(|row| (row.key, row.value))
        .collect()
}

/// Builds a snapshot entry.
pub fn entry(key: &[u8], value: &[u8], timestamp: u64, deleted: bool) -> Entry {
    let flags = if deleted { Flags::DELETED } else { Flags::NONE };
    let value = if deleted {
        Bytes::new()
    } else {
        Bytes::copy_from_slice(value)
    };
    Entry::new(Bytes::copy_from_slice(key), value, timestamp, flags.as_byte())
}

/// Builds a snapshot holding one table.
pub fn snapshot_with(instance: &str, table: &str, entries: Vec<Entry>) -> Snapshot {
    let mut snapshot = Snapshot::new(SnapshotMeta {
        instance_id: instance.to_string(),
        generation_id: "test".to_string(),
        hostname: "localhost".to_string(),
        database_name: "test".to_string(),
        source_txn_id: 1,
        timestamp: 1,
    });
    let mut t = SnapshotTable::new(table, 0);
    t.entries = entries;
    snapshot.tables.push(t);
    snapshot
}

/// A filesystem blob store in a temporary directory.
pub struct TempStore {
    /// The store.
    pub store: FsStore,
    _dir: TempDir,
}

impl TempStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FsStore::open(dir.path()).expect("Failed to open store");
        Self { store, _dir: dir }
    }

    /// Directory backing the store.
    pub fn path(&self) -> &Path {
        self._dir.path()
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempStore {
    type Target = FsStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_storage::BlobStore;

    #[test]
    fn tagged_rows_roundtrip() {
        let env = env_with_table("t");
        put_tagged(&env, "t", b"a", 10, b"x");
        put_tombstone(&env, "t", b"b", 11);
        let rows = read_tagged(&env, "t");
        assert_eq!(rows.len(), 2);
        assert!(rows[1].deleted);
        assert_eq!(live_values(&env, "t"), vec![(b"a".to_vec(), b"x".to_vec())]);
        delete_key(&env, "t", b"a");
        assert_eq!(read_plain(&env, "t").len(), 1);
    }

    #[test]
    fn temp_store_is_usable() {
        let store = TempStore::new();
        store.store("a", b"1").unwrap();
        assert_eq!(store.list("").unwrap().len(), 1);
        assert!(store.path().exists());
    }
}
