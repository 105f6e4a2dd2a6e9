//! Blob store trait definition.

use crate::error::StorageResult;
use bytes::Bytes;

/// Name and size of a stored blob, as returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlobInfo {
    /// Full blob name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// An object store holding immutable, named snapshot blobs.
///
/// # Invariants
///
/// - `store` is atomic: a concurrent `load` returns either nothing or the
///   complete blob
/// - `list` eventually reflects every prior `store`; no strict recency is
///   required
/// - `list` results are sorted by name
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FsStore`] - For a local or shared directory
pub trait BlobStore: Send + Sync {
    /// Lists all blobs whose name starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be obtained.
    fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>>;

    /// Loads a complete blob.
    ///
    /// # Errors
    ///
    /// Returns [`super::StorageError::NotFound`] if no blob has this name,
    /// or another error if the read fails.
    fn load(&self, name: &str) -> StorageResult<Bytes>;

    /// Stores a blob under `name`, replacing any existing blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()>;
}
