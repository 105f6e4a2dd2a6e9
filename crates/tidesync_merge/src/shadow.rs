//! Tagging of plain table contents with headers.

use crate::error::{MergeError, MergeResult};
use crate::iterator::SyncIterator;
use tidesync_codec::header::{self, Flags};

/// Turns the current contents of a plain table into header-tagged entries
/// for its shadow table.
///
/// A key whose value is unchanged keeps its shadow entry, timestamp
/// included, so repeated passes over an unchanged table write nothing.
/// Changed and new keys get `timestamp`; keys gone from the plain table
/// become tombstones.
///
/// A change is always stamped later than the shadow entry it replaces,
/// even if the local clock is behind that entry, so that the local edit
/// wins on every instance.
#[derive(Debug)]
pub struct ShadowIterator {
    table: String,
    rows: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    txn_id: u64,
    timestamp: u64,
    buf: Vec<u8>,
}

impl ShadowIterator {
    /// Creates an iterator over `(sync key, plain value)` rows sorted by key.
    pub fn new(
        table: impl Into<String>,
        rows: Vec<(Vec<u8>, Vec<u8>)>,
        txn_id: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            table: table.into(),
            rows,
            pos: 0,
            txn_id,
            timestamp,
            buf: Vec::new(),
        }
    }

    fn stamp(&mut self, after: Option<u64>, flags: Flags, value: &[u8]) -> &[u8] {
        let ts = match after {
            Some(old) => self.timestamp.max(old.saturating_add(1)),
            None => self.timestamp,
        };
        self.buf.clear();
        header::write_basic(&mut self.buf, ts, self.txn_id, flags);
        self.buf.extend_from_slice(value);
        &self.buf
    }
}

impl SyncIterator for ShadowIterator {
    fn next(&mut self) -> MergeResult<Option<&[u8]>> {
        if self.pos > self.rows.len() {
            return Ok(None);
        }
        self.pos += 1;
        Ok(self.rows.get(self.pos - 1).map(|(k, _)| k.as_slice()))
    }

    fn merge<'a>(&'a mut self, old: Option<&'a [u8]>) -> MergeResult<Option<&'a [u8]>> {
        let i = self.pos.checked_sub(1).ok_or(MergeError::NotPositioned)?;
        let (key, value) = self.rows.get(i).ok_or(MergeError::NotPositioned)?;
        let Some(old) = old else {
            let value = value.clone();
            return Ok(Some(self.stamp(None, Flags::NONE, &value)));
        };
        let (h, old_value) = header::parse(old).map_err(|e| MergeError::header(&self.table, key, e))?;
        if !h.is_deleted() && old_value == value.as_slice() {
            return Ok(Some(old));
        }
        let value = value.clone();
        Ok(Some(self.stamp(Some(h.timestamp), Flags::NONE, &value)))
    }

    fn clean<'a>(&'a mut self, old: &'a [u8]) -> MergeResult<Option<&'a [u8]>> {
        let (h, _) = header::parse(old).map_err(|e| MergeError::header(&self.table, b"", e))?;
        if h.is_deleted() {
            return Ok(Some(old));
        }
        Ok(Some(self.stamp(Some(h.timestamp), Flags::DELETED, &[])))
    }
}
