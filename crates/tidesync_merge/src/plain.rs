//! Projection of header-tagged entries onto a plain table.

use crate::error::{MergeError, MergeResult};
use crate::iterator::SyncIterator;
use tidesync_codec::header;

/// Writes the live entries of a header-tagged table as plain values.
///
/// Conflicts have already been resolved in the source, so there is no
/// timestamp comparison: tombstoned source entries delete the key, and
/// table keys missing from the source are deleted.
#[derive(Debug)]
pub struct PlainIterator {
    table: String,
    rows: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl PlainIterator {
    /// Creates an iterator over `(sync key, header-tagged value)` rows,
    /// sorted by key.
    pub fn new(table: impl Into<String>, rows: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            table: table.into(),
            rows,
            pos: 0,
        }
    }
}

impl SyncIterator for PlainIterator {
    fn next(&mut self) -> MergeResult<Option<&[u8]>> {
        if self.pos > self.rows.len() {
            return Ok(None);
        }
        self.pos += 1;
        Ok(self.rows.get(self.pos - 1).map(|(k, _)| k.as_slice()))
    }

    fn merge<'a>(&'a mut self, _old: Option<&'a [u8]>) -> MergeResult<Option<&'a [u8]>> {
        let (key, value) = self
            .pos
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .ok_or(MergeError::NotPositioned)?;
        let (h, app) = header::parse(value).map_err(|e| MergeError::header(&self.table, key, e))?;
        if h.is_deleted() || app.is_empty() {
            Ok(None)
        } else {
            Ok(Some(app))
        }
    }

    fn clean<'a>(&'a mut self, _old: &'a [u8]) -> MergeResult<Option<&'a [u8]>> {
        Ok(None)
    }
}
