//! Table storage.
//!
//! A table is a `BTreeMap` from an *internal key* to a value. The internal
//! key is chosen so that plain byte order of internal keys equals the
//! table's logical order:
//!
//! - plain tables: the key itself
//! - integer-keyed tables: the key widened to a big-endian `u64`
//! - duplicate-sorted tables: the [`crate::dupkey`] composite of key and
//!   value, with an empty stored value

use crate::dupkey;
use crate::error::{CoreError, CoreResult};
use crate::types::{decode_le, TableFlags};
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone)]
pub(crate) struct TableData {
    pub(crate) flags: TableFlags,
    /// Width of integer keys, fixed by the first insert.
    int_width: Option<usize>,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    bytes: usize,
}

impl TableData {
    pub(crate) fn new(flags: TableFlags) -> Self {
        Self {
            flags,
            int_width: None,
            entries: BTreeMap::new(),
            bytes: 0,
        }
    }

    /// Number of stored entries (duplicates counted individually).
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bytes of keys plus values held by this table.
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn last_internal(&self) -> Option<&Vec<u8>> {
        self.entries.keys().next_back()
    }

    /// Maps a user key to its internal form.
    pub(crate) fn internal_key(&self, table: &str, key: &[u8]) -> CoreResult<Vec<u8>> {
        if !self.flags.is_integer_key() {
            return Ok(key.to_vec());
        }
        let value = decode_le(key).ok_or_else(|| CoreError::InvalidIntegerKey {
            table: table.to_string(),
            key: tidesync_codec::escape_key(key),
            expected: self.int_width.unwrap_or(8),
        })?;
        if let Some(width) = self.int_width {
            if width != key.len() {
                return Err(CoreError::InvalidIntegerKey {
                    table: table.to_string(),
                    key: tidesync_codec::escape_key(key),
                    expected: width,
                });
            }
        }
        Ok(value.to_be_bytes().to_vec())
    }

    /// Maps a stored entry back to the user's `(key, value)`.
    pub(crate) fn user_entry(&self, internal: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
        if self.flags.is_dup_sort() {
            return match dupkey::decode(internal) {
                Some((key, dup)) => (key, dup.to_vec()),
                None => (internal.to_vec(), Vec::new()),
            };
        }
        if self.flags.is_integer_key() {
            let mut be = [0u8; 8];
            be.copy_from_slice(internal);
            let n = u64::from_be_bytes(be);
            let key = match self.int_width {
                Some(4) => (n as u32).to_le_bytes().to_vec(),
                _ => n.to_le_bytes().to_vec(),
            };
            return (key, value.to_vec());
        }
        (internal.to_vec(), value.to_vec())
    }

    /// Internal key and stored value for a user `(key, value)`.
    pub(crate) fn encode_entry(
        &self,
        table: &str,
        key: &[u8],
        value: &[u8],
    ) -> CoreResult<(Vec<u8>, Vec<u8>)> {
        if self.flags.is_dup_sort() {
            Ok((dupkey::encode(key, value), Vec::new()))
        } else {
            Ok((self.internal_key(table, key)?, value.to_vec()))
        }
    }

    /// Internal key at which the entries for `key` start.
    pub(crate) fn seek_key(&self, table: &str, key: &[u8]) -> CoreResult<Vec<u8>> {
        if self.flags.is_dup_sort() {
            Ok(dupkey::encode_prefix(key))
        } else {
            self.internal_key(table, key)
        }
    }

    pub(crate) fn get_internal(&self, internal: &[u8]) -> Option<&Vec<u8>> {
        self.entries.get(internal)
    }

    /// First entry at or after `bound`.
    pub(crate) fn seek(&self, bound: Bound<&[u8]>) -> Option<(&Vec<u8>, &Vec<u8>)> {
        self.entries
            .range::<[u8], _>((bound, Bound::Unbounded))
            .next()
    }

    /// All internal keys starting with `prefix`.
    pub(crate) fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.entries
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Inserts an entry, returning the byte delta.
    pub(crate) fn insert(&mut self, user_key_len: usize, internal: Vec<u8>, value: Vec<u8>) -> isize {
        if self.flags.is_integer_key() && self.int_width.is_none() {
            self.int_width = Some(user_key_len);
        }
        let added = (internal.len() + value.len()) as isize;
        let removed = self
            .entries
            .get(&internal)
            .map(|old| (internal.len() + old.len()) as isize)
            .unwrap_or(0);
        self.entries.insert(internal, value);
        let delta = added - removed;
        self.bytes = (self.bytes as isize + delta) as usize;
        delta
    }

    /// Removes an entry, returning the bytes freed.
    pub(crate) fn remove(&mut self, internal: &[u8]) -> Option<usize> {
        let value = self.entries.remove(internal)?;
        let freed = internal.len() + value.len();
        self.bytes -= freed;
        Some(freed)
    }

    /// Bytes an insert of `(internal, value)` would add.
    pub(crate) fn growth(&self, internal: &[u8], value: &[u8]) -> isize {
        let added = (internal.len() + value.len()) as isize;
        let removed = self
            .entries
            .get(internal)
            .map(|old| (internal.len() + old.len()) as isize)
            .unwrap_or(0);
        added - removed
    }
}
