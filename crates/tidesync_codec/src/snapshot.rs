//! Snapshot container.
//!
//! A snapshot is the complete replicated state of one instance at one
//! transaction: a list of named tables, each a sorted list of entries with
//! their timestamp and flags. Snapshots are immutable once produced.
//!
//! ## Container format
//!
//! ```text
//! magic (8) | body length (u64 BE) | CBOR body | SHA-256 of body (32)
//! ```
//!
//! The body is the serde/CBOR encoding of [`Snapshot`]. The checksum detects
//! truncated or damaged blobs before any entry reaches a merge.

use crate::error::{CodecError, CodecResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Magic bytes at the start of every snapshot blob.
pub const MAGIC: [u8; 8] = *b"TIDESNAP";

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 2;

/// Oldest reader version able to consume snapshots written by this build.
pub const COMPAT_VERSION: u32 = 1;

/// First format version carrying an explicit deleted flag per entry.
///
/// Older snapshots mark deletions with an empty value.
pub const DELETED_FLAG_VERSION: u32 = 2;

const CHECKSUM_SIZE: usize = 32;
const PREFIX_SIZE: usize = MAGIC.len() + 8;

/// One replicated key with its value, timestamp and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Sync key (after any table transform).
    pub key: Bytes,
    /// Application value; empty for tombstones.
    pub value: Bytes,
    /// Last modification time in nanoseconds since the epoch.
    pub timestamp: u64,
    /// Header flags (masked to the sync subset).
    pub flags: u8,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>, timestamp: u64, flags: u8) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            flags,
        }
    }
}

/// A table inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotTable {
    /// Table name.
    pub name: String,
    /// Storage flags of the source table.
    pub flags: u32,
    /// Entries, strictly increasing by the table's key order.
    pub entries: Vec<Entry>,
}

impl SnapshotTable {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>, flags: u32) -> Self {
        Self {
            name: name.into(),
            flags,
            entries: Vec::new(),
        }
    }
}

/// Who produced a snapshot, and when.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Producing instance.
    pub instance_id: String,
    /// Process generation of the producing instance.
    pub generation_id: String,
    /// Host the producer ran on.
    pub hostname: String,
    /// Name of the replicated database (table set).
    pub database_name: String,
    /// Transaction id the snapshot was read from.
    pub source_txn_id: u64,
    /// Creation time in nanoseconds since the epoch.
    pub timestamp: u64,
}

/// A complete replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version the snapshot was written with.
    pub format_version: u32,
    /// Minimum reader version.
    pub compat_version: u32,
    /// Producer metadata.
    pub meta: SnapshotMeta,
    /// Tables in name order.
    pub tables: Vec<SnapshotTable>,
}

impl Snapshot {
    /// Creates an empty snapshot at the current format version.
    #[must_use]
    pub fn new(meta: SnapshotMeta) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            compat_version: COMPAT_VERSION,
            meta,
            tables: Vec::new(),
        }
    }

    /// Finds a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&SnapshotTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Total number of entries across all tables.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.tables.iter().map(|t| t.entries.len()).sum()
    }

    /// True if entries of this snapshot carry an explicit deleted flag.
    #[must_use]
    pub fn has_deleted_flag(&self) -> bool {
        self.format_version >= DELETED_FLAG_VERSION
    }

    /// Encodes the snapshot into a framed container.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::EncodingFailed`] if serialization fails.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::into_writer(self, &mut body)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;

        let mut out = Vec::with_capacity(PREFIX_SIZE + body.len() + CHECKSUM_SIZE);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&(body.len() as u64).to_be_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&Sha256::digest(&body));
        Ok(out)
    }

    /// Decodes a framed container.
    ///
    /// # Errors
    ///
    /// - [`CodecError::Corrupt`] on bad magic, truncation, checksum mismatch
    ///   or an undecodable body
    /// - [`CodecError::Incompatible`] if the snapshot needs a newer reader
    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < PREFIX_SIZE + CHECKSUM_SIZE {
            return Err(CodecError::corrupt(format!(
                "container too short: {} bytes",
                data.len()
            )));
        }
        if data[..MAGIC.len()] != MAGIC {
            return Err(CodecError::corrupt("bad magic"));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[MAGIC.len()..PREFIX_SIZE]);
        let body_len = u64::from_be_bytes(len_bytes);
        let expected = (PREFIX_SIZE + CHECKSUM_SIZE) as u64 + body_len;
        if data.len() as u64 != expected {
            return Err(CodecError::corrupt(format!(
                "container length {} does not match declared body length {}",
                data.len(),
                body_len
            )));
        }

        let body_end = PREFIX_SIZE + body_len as usize;
        let body = &data[PREFIX_SIZE..body_end];
        if Sha256::digest(body).as_slice() != &data[body_end..] {
            return Err(CodecError::corrupt("checksum mismatch"));
        }

        let snapshot: Snapshot =
            ciborium::from_reader(body).map_err(|e| CodecError::corrupt(e.to_string()))?;
        if snapshot.compat_version > FORMAT_VERSION {
            return Err(CodecError::Incompatible {
                compat_version: snapshot.compat_version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new(SnapshotMeta {
            instance_id: "node-a".into(),
            generation_id: "g1".into(),
            hostname: "host".into(),
            database_name: "main".into(),
            source_txn_id: 12,
            timestamp: 1_700_000_000_000_000_000,
        });
        let mut table = SnapshotTable::new("users", 0);
        table.entries.push(Entry::new(&b"aaa"[..], &b"1"[..], 10, 0));
        table.entries.push(Entry::new(&b"bbb"[..], Bytes::new(), 11, 1));
        snapshot.tables.push(table);
        snapshot
    }

    #[test]
    fn container_roundtrip() {
        let snapshot = sample();
        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.entry_count(), 2);
        assert!(decoded.table("users").is_some());
    }

    #[test]
    fn flipped_byte_is_corrupt() {
        let mut data = sample().encode().unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        assert!(matches!(
            Snapshot::decode(&data),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn truncated_is_corrupt() {
        let data = sample().encode().unwrap();
        assert!(matches!(
            Snapshot::decode(&data[..data.len() - 1]),
            Err(CodecError::Corrupt { .. })
        ));
        assert!(matches!(
            Snapshot::decode(&data[..10]),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut data = sample().encode().unwrap();
        data[0] = b'X';
        assert!(matches!(
            Snapshot::decode(&data),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn newer_compat_version_is_rejected() {
        let mut snapshot = sample();
        snapshot.compat_version = FORMAT_VERSION + 1;
        let data = snapshot.encode().unwrap();
        assert_eq!(
            Snapshot::decode(&data).unwrap_err(),
            CodecError::Incompatible {
                compat_version: FORMAT_VERSION + 1,
                supported: FORMAT_VERSION,
            }
        );
    }

    #[test]
    fn legacy_versions_lack_deleted_flag() {
        let mut snapshot = sample();
        assert!(snapshot.has_deleted_flag());
        snapshot.format_version = 1;
        assert!(!snapshot.has_deleted_flag());
    }
}
