//! Error types for merge operations.

use thiserror::Error;
use tidesync_codec::HeaderError;
use tidesync_core::{CoreError, TxnId};

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors that can occur while merging a sequence into a table.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The source sequence is not strictly increasing in the table's order.
    #[error("keys not sorted in table {table} ({txn_id}): {key} does not sort after {prev}")]
    KeysNotSorted {
        /// Target table.
        table: String,
        /// Escaped offending key.
        key: String,
        /// Escaped previous key.
        prev: String,
        /// Transaction the merge ran in.
        txn_id: TxnId,
    },

    /// A stored or incoming value carries an unreadable header.
    #[error("bad header in table {table} at key {key}: {source}")]
    Header {
        /// Table name.
        table: String,
        /// Escaped key.
        key: String,
        /// Underlying codec error.
        #[source]
        source: HeaderError,
    },

    /// The append strategy was used on a table that already has entries.
    #[error("table {table} is not empty; append needs an empty table")]
    TableNotEmpty {
        /// Table name.
        table: String,
    },

    /// A source key cannot be stored in the table at all, such as an
    /// integer key that is not 4 or 8 bytes wide.
    #[error("invalid key {key} for table {table}: {reason}")]
    InvalidKey {
        /// Table name.
        table: String,
        /// Escaped key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A sync key could not be mapped back onto the table's storage layout.
    #[error("invalid sync key {key} for table {table}")]
    InvalidSyncKey {
        /// Table name.
        table: String,
        /// Escaped key.
        key: String,
    },

    /// `merge` or `clean` was called without a current entry.
    #[error("iterator is not positioned on an entry")]
    NotPositioned,

    /// Store error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl MergeError {
    /// Creates a header error for `key` in `table`.
    pub fn header(table: impl Into<String>, key: &[u8], source: HeaderError) -> Self {
        Self::Header {
            table: table.into(),
            key: tidesync_codec::escape_key(key),
            source,
        }
    }

    /// Creates a keys-not-sorted error.
    pub fn keys_not_sorted(table: impl Into<String>, key: &[u8], prev: &[u8], txn_id: TxnId) -> Self {
        Self::KeysNotSorted {
            table: table.into(),
            key: tidesync_codec::escape_key(key),
            prev: tidesync_codec::escape_key(prev),
            txn_id,
        }
    }

    /// Creates an invalid-key error.
    pub fn invalid_key(table: impl Into<String>, key: &[u8], reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            table: table.into(),
            key: tidesync_codec::escape_key(key),
            reason: reason.into(),
        }
    }

    /// True if the same input would fail the same way again.
    ///
    /// Store errors count only when the store rejected the data itself.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        match self {
            Self::Core(e) => e.is_rejected_input(),
            _ => true,
        }
    }
}
