//! Error types for the codec crate.

use thiserror::Error;

/// Result type for snapshot codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for header parsing.
pub type HeaderResult<T> = Result<T, HeaderError>;

/// Errors raised while parsing a versioned value header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// The value is shorter than the header it declares.
    #[error("value too short for header: {len} bytes, need {needed}")]
    TooShort {
        /// Actual value length.
        len: usize,
        /// Bytes required by the header.
        needed: usize,
    },

    /// The header format version is not understood.
    #[error("unsupported header version {0}")]
    UnsupportedVersion(u8),

    /// Extension data is not a whole number of 8-byte blocks.
    #[error("extension length {0} is not a multiple of 8 or too large")]
    InvalidExtension(usize),
}

/// Errors raised while encoding or decoding a snapshot container.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The snapshot could not be serialized.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// The container is damaged or not a snapshot at all.
    #[error("corrupt snapshot: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// The snapshot requires a newer reader.
    #[error("incompatible snapshot: requires format {compat_version}, supported {supported}")]
    Incompatible {
        /// Minimum reader version declared by the snapshot.
        compat_version: u32,
        /// Highest format version this build reads.
        supported: u32,
    },
}

impl CodecError {
    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a corrupt snapshot error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

/// Errors raised while parsing a snapshot blob name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Fewer than the four `__` separated parts.
    #[error("snapshot name {0:?} has too few parts")]
    TooFewParts(String),

    /// The generation part has no file extension.
    #[error("snapshot name {0:?} has no extension")]
    MissingExtension(String),

    /// The timestamp part is not `YYYYMMDD-HHMMSS.nnnnnnnnn`.
    #[error("snapshot name {name:?} has invalid timestamp {timestamp:?}")]
    InvalidTimestamp {
        /// Full name.
        name: String,
        /// Offending timestamp segment.
        timestamp: String,
    },

    /// A name component contains the `__` separator or is empty.
    #[error("invalid snapshot name component {0:?}")]
    InvalidComponent(String),
}
