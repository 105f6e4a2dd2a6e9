//! Target tables and the mapping between stored and sync entries.

use crate::error::{MergeError, MergeResult};
use bytes::Bytes;
use tidesync_codec::{header, Entry};
use tidesync_core::{dupkey, Cursor, KeyOrder, TableFlags, Txn, TxnId, WriteTxn};

/// How a table's stored entries map to unique sync keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableTransform {
    /// Sync key and value are the stored key and value.
    Identity,
    /// Each `(key, duplicate)` pair becomes one sync entry whose key is the
    /// order-preserving composite of both and whose value is the duplicate.
    DupSortHack,
}

impl TableTransform {
    /// Chooses the transform for a table with `flags`.
    #[must_use]
    pub fn for_flags(flags: TableFlags) -> Self {
        if flags.is_dup_sort() {
            Self::DupSortHack
        } else {
            Self::Identity
        }
    }

    /// Order of sync keys for a table with `flags` under this transform.
    #[must_use]
    pub fn key_order(self, flags: TableFlags) -> KeyOrder {
        match self {
            Self::Identity => KeyOrder::for_flags(flags),
            Self::DupSortHack => KeyOrder::Bytes,
        }
    }

    /// Maps a stored `(key, value)` to a sync `(key, value)`.
    #[must_use]
    pub fn to_sync(self, key: Vec<u8>, value: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
        match self {
            Self::Identity => (key, value),
            Self::DupSortHack => (dupkey::encode(&key, &value), value),
        }
    }
}

/// Reads every entry of a table through its transform, in sync key order.
///
/// # Errors
///
/// Returns a store error if the table does not exist.
pub fn read_sync_entries<T: Txn + ?Sized>(
    txn: &T,
    table: &str,
) -> MergeResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let transform = TableTransform::for_flags(txn.table_flags(table)?);
    let mut cursor = txn.cursor(table)?;
    let mut out = Vec::with_capacity(txn.len(table)?);
    while let Some((key, value)) = cursor.next(txn)? {
        out.push(transform.to_sync(key, value));
    }
    Ok(out)
}

/// Reads a header-aware table into snapshot entries.
///
/// Values are split into header and application value; flags are masked
/// to the subset that may leave this instance.
///
/// # Errors
///
/// Returns [`MergeError::Header`] for a value without a valid header.
pub fn read_entries<T: Txn + ?Sized>(txn: &T, table: &str) -> MergeResult<Vec<Entry>> {
    let mut cursor = txn.cursor(table)?;
    let mut out = Vec::with_capacity(txn.len(table)?);
    while let Some((key, value)) = cursor.next(txn)? {
        let (h, app) = header::parse(&value).map_err(|e| MergeError::header(table, &key, e))?;
        let app = if h.is_deleted() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(app)
        };
        out.push(Entry::new(key, app, h.timestamp, h.flags.masked().as_byte()));
    }
    Ok(out)
}

/// A table being written by a strategy.
///
/// Wraps the write transaction, the table name and its transform, and
/// exposes the table in terms of sync keys.
pub struct SinkTable<'t, 'env> {
    txn: &'t mut WriteTxn<'env>,
    name: String,
    transform: TableTransform,
    order: KeyOrder,
}

impl<'t, 'env> SinkTable<'t, 'env> {
    /// Opens an existing table with the transform its flags call for.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table does not exist.
    pub fn open(txn: &'t mut WriteTxn<'env>, name: &str) -> MergeResult<Self> {
        let flags = txn.table_flags(name)?;
        let transform = TableTransform::for_flags(flags);
        Ok(Self {
            txn,
            name: name.to_string(),
            transform,
            order: transform.key_order(flags),
        })
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's transform.
    #[must_use]
    pub fn transform(&self) -> TableTransform {
        self.transform
    }

    /// Order sync keys must follow.
    #[must_use]
    pub fn key_order(&self) -> KeyOrder {
        self.order
    }

    /// Id of the enclosing write transaction.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn.id()
    }

    /// Checks whether the table has no entries.
    ///
    /// # Errors
    ///
    /// Returns a store error if the table was dropped.
    pub fn is_empty(&self) -> MergeResult<bool> {
        Ok(self.txn.is_empty(&self.name)?)
    }

    pub(crate) fn cursor(&self) -> MergeResult<Cursor> {
        Ok(self.txn.cursor(&self.name)?)
    }

    pub(crate) fn next_entry(&self, cursor: &mut Cursor) -> MergeResult<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(cursor
            .next(&*self.txn)?
            .map(|(k, v)| self.transform.to_sync(k, v)))
    }

    /// Stores a sync entry, replacing the one with the same sync key.
    ///
    /// # Errors
    ///
    /// Returns a store error, or [`MergeError::InvalidSyncKey`] if the key
    /// does not decode under the table's transform.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> MergeResult<()> {
        match self.transform {
            TableTransform::Identity => self.txn.put(&self.name, key, value)?,
            TableTransform::DupSortHack => {
                let (k, dup) = self.split(key)?;
                self.txn.put(&self.name, &k, dup)?;
            }
        }
        Ok(())
    }

    /// Stores a sync entry that sorts after every stored entry.
    ///
    /// # Errors
    ///
    /// Same as [`SinkTable::put`], plus the store's not-appendable error.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> MergeResult<()> {
        match self.transform {
            TableTransform::Identity => self.txn.append(&self.name, key, value)?,
            TableTransform::DupSortHack => {
                let (k, dup) = self.split(key)?;
                self.txn.append(&self.name, &k, dup)?;
            }
        }
        Ok(())
    }

    /// Deletes the entry with this sync key.
    ///
    /// Deleting never disturbs a cursor of this table.
    ///
    /// # Errors
    ///
    /// Same as [`SinkTable::put`].
    pub fn delete(&mut self, key: &[u8]) -> MergeResult<()> {
        match self.transform {
            TableTransform::Identity => {
                self.txn.delete(&self.name, key)?;
            }
            TableTransform::DupSortHack => {
                let (k, dup) = self.split(key)?;
                self.txn.delete_dup(&self.name, &k, dup)?;
            }
        }
        Ok(())
    }

    fn split<'k>(&self, key: &'k [u8]) -> MergeResult<(Vec<u8>, &'k [u8])> {
        dupkey::decode(key).ok_or_else(|| MergeError::InvalidSyncKey {
            table: self.name.clone(),
            key: tidesync_codec::escape_key(key),
        })
    }
}

impl std::fmt::Debug for SinkTable<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkTable")
            .field("name", &self.name)
            .field("transform", &self.transform)
            .field("txn_id", &self.txn.id())
            .finish()
    }
}
