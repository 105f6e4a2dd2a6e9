//! Forward cursors.

use crate::error::CoreResult;
use crate::transaction::Txn;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    At(Vec<u8>),
    End,
}

/// A forward cursor over one table.
///
/// The cursor remembers the internal key of the last entry it returned
/// rather than borrowing the table, so the transaction it reads through may
/// insert or delete entries (including the current one) between calls.
/// [`Cursor::next`] always yields the first entry strictly after the last
/// returned position.
///
/// Every call takes the transaction explicitly; reading through a different
/// transaction than the one the cursor was opened on is allowed and simply
/// continues from the same position in that transaction's view.
#[derive(Debug, Clone)]
pub struct Cursor {
    table: String,
    position: Position,
}

/// An owned `(key, value)` pair returned by a cursor.
pub type CursorEntry = (Vec<u8>, Vec<u8>);

impl Cursor {
    pub(crate) fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            position: Position::Unpositioned,
        }
    }

    /// Name of the table the cursor walks.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Moves to the first entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TableNotFound`] if the table was dropped.
    pub fn first<T: Txn + ?Sized>(&mut self, txn: &T) -> CoreResult<Option<CursorEntry>> {
        self.seek(txn, Bound::Unbounded)
    }

    /// Moves to the entry after the current position.
    ///
    /// An unpositioned cursor moves to the first entry; a cursor past the
    /// end stays there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TableNotFound`] if the table was dropped.
    #[allow(clippy::should_implement_trait)]
    pub fn next<T: Txn + ?Sized>(&mut self, txn: &T) -> CoreResult<Option<CursorEntry>> {
        match std::mem::replace(&mut self.position, Position::End) {
            Position::Unpositioned => self.seek(txn, Bound::Unbounded),
            Position::At(last) => self.seek(txn, Bound::Excluded(&last)),
            Position::End => Ok(None),
        }
    }

    /// Moves to the first entry whose key is at or after `key`.
    ///
    /// In a duplicate-sorted table this is the first duplicate of the first
    /// key at or after `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::TableNotFound`] if the table was dropped,
    /// or [`crate::CoreError::InvalidIntegerKey`] for a malformed integer
    /// key.
    pub fn set_range<T: Txn + ?Sized>(
        &mut self,
        txn: &T,
        key: &[u8],
    ) -> CoreResult<Option<CursorEntry>> {
        let start = {
            let snapshot = txn.snapshot();
            snapshot.table(&self.table)?.seek_key(&self.table, key)?
        };
        self.seek(txn, Bound::Included(&start))
    }

    fn seek<T: Txn + ?Sized>(
        &mut self,
        txn: &T,
        bound: Bound<&Vec<u8>>,
    ) -> CoreResult<Option<CursorEntry>> {
        let snapshot = txn.snapshot();
        let data = snapshot.table(&self.table)?;
        let bound = match bound {
            Bound::Included(k) => Bound::Included(k.as_slice()),
            Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        match data.seek(bound) {
            Some((internal, value)) => {
                let entry = data.user_entry(internal, value);
                self.position = Position::At(internal.clone());
                Ok(Some(entry))
            }
            None => {
                self.position = Position::End;
                Ok(None)
            }
        }
    }
}
