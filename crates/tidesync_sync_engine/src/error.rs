//! Error types for the sync engine.

use thiserror::Error;
use tidesync_codec::{CodecError, NameError};
use tidesync_core::CoreError;
use tidesync_merge::MergeError;
use tidesync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Blob storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Snapshot name could not be built or parsed.
    #[error("snapshot name error: {0}")]
    Name(#[from] NameError),

    /// Merging into a table failed.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// A table cannot be replicated in the active schema mode.
    #[error("table {table:?} cannot be replicated: {reason}")]
    UnsupportedTable {
        /// Table name.
        table: String,
        /// Why not.
        reason: String,
    },

    /// A remote snapshot holds data the local store cannot take.
    #[error("invalid snapshot table {table:?}: {reason}")]
    InvalidSnapshot {
        /// Table name.
        table: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates an unsupported-table error.
    pub fn unsupported_table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedTable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-snapshot error.
    pub fn invalid_snapshot(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the error comes from the content of one snapshot.
    ///
    /// Such a snapshot fails the same way every time it is loaded.
    pub fn is_bad_snapshot(&self) -> bool {
        match self {
            SyncError::Codec(_)
            | SyncError::UnsupportedTable { .. }
            | SyncError::InvalidSnapshot { .. } => true,
            SyncError::Merge(e) => e.is_deterministic(),
            SyncError::Database(e) => e.is_rejected_input(),
            _ => false,
        }
    }

    /// Returns true if the local database cannot be trusted any more.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Database(e) | SyncError::Merge(MergeError::Core(e)) => !e.is_rejected_input(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_core::TxnId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(StorageError::Unavailable("503".into())).is_retryable());
        assert!(!SyncError::from(StorageError::NotFound("a".into())).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::from(CoreError::MapFull {
            used: 1,
            needed: 1,
            map_size: 1,
        })
        .is_retryable());
    }

    #[test]
    fn classification() {
        let unsorted = MergeError::keys_not_sorted("t", b"a", b"b", TxnId::new(3));
        assert!(SyncError::from(unsorted).is_bad_snapshot());
        assert!(SyncError::from(CodecError::corrupt("bad magic")).is_bad_snapshot());
        assert!(SyncError::from(CoreError::table_not_found("t")).is_fatal());
        assert!(!SyncError::Cancelled.is_fatal());
    }

    #[test]
    fn rejected_writes_blame_the_snapshot() {
        let oversized = || CoreError::BadValSize {
            table: "t".into(),
            size: 600,
            max: 511,
        };
        let err = SyncError::from(MergeError::from(oversized()));
        assert!(err.is_bad_snapshot());
        assert!(!err.is_fatal());

        let err = SyncError::from(CoreError::invalid_operation("table name must not be empty"));
        assert!(err.is_bad_snapshot());
        assert!(!err.is_fatal());

        let err = SyncError::invalid_snapshot("", "empty table name");
        assert!(err.is_bad_snapshot());
        assert!(!err.is_fatal());

        let full = SyncError::from(CoreError::MapFull {
            used: 1,
            needed: 1,
            map_size: 1,
        });
        assert!(full.is_fatal());
        assert!(!full.is_bad_snapshot());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Cancelled;
        assert_eq!(err.to_string(), "sync cancelled");

        let err = SyncError::unsupported_table("dups", "duplicate keys need shadow mode");
        assert!(err.to_string().contains("dups"));
        assert!(err.to_string().contains("shadow"));
    }
}
