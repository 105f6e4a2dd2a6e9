//! Error types for the embedded store.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The named table does not exist.
    #[error("table not found: {name}")]
    TableNotFound {
        /// Table name.
        name: String,
    },

    /// The table exists with different flags.
    #[error("table {name} exists with flags {existing:#x}, requested {requested:#x}")]
    TableFlagsMismatch {
        /// Table name.
        name: String,
        /// Flags of the existing table.
        existing: u32,
        /// Requested flags.
        requested: u32,
    },

    /// The configured maximum number of tables was reached.
    #[error("too many tables (limit {limit})")]
    TooManyTables {
        /// Configured limit.
        limit: usize,
    },

    /// The environment is full.
    #[error("map full: {used} bytes used, write needs {needed} more, map size {map_size}")]
    MapFull {
        /// Bytes in use before the write.
        used: usize,
        /// Additional bytes required.
        needed: usize,
        /// Configured capacity.
        map_size: usize,
    },

    /// A key (or duplicate value) is empty or longer than allowed.
    #[error("bad key/value size {size} in table {table} (max {max})")]
    BadValSize {
        /// Table name.
        table: String,
        /// Offending size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// An integer-keyed table received a key of the wrong width.
    #[error("invalid integer key {key} in table {table}: expected {expected} bytes")]
    InvalidIntegerKey {
        /// Table name.
        table: String,
        /// Escaped key.
        key: String,
        /// Required key width.
        expected: usize,
    },

    /// Append was called with a key that does not sort after the last key.
    #[error("cannot append key {key} to table {table}: not past the last key")]
    NotAppendable {
        /// Table name.
        table: String,
        /// Escaped key.
        key: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Self::TableNotFound { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// True if the store refused the data handed to it and is otherwise
    /// unaffected: bad key sizes or widths, flag conflicts, table limits.
    ///
    /// The same write fails the same way again.
    #[must_use]
    pub fn is_rejected_input(&self) -> bool {
        matches!(
            self,
            Self::BadValSize { .. }
                | Self::InvalidIntegerKey { .. }
                | Self::NotAppendable { .. }
                | Self::TableFlagsMismatch { .. }
                | Self::TooManyTables { .. }
                | Self::InvalidOperation { .. }
        )
    }

    /// Creates a not appendable error for `key`.
    pub fn not_appendable(table: impl Into<String>, key: &[u8]) -> Self {
        Self::NotAppendable {
            table: table.into(),
            key: tidesync_codec::escape_key(key),
        }
    }
}
