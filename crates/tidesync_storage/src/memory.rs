//! In-memory blob store for testing.

use crate::backend::{BlobInfo, BlobStore};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

/// An in-memory blob store.
///
/// This store keeps all blobs in memory and is suitable for:
/// - Unit and integration tests
/// - Several syncers replicating inside one process
///
/// Failures can be injected with [`InMemoryStore::fail_next`] to exercise
/// retry paths.
///
/// # Example
///
/// ```rust
/// use tidesync_storage::{BlobStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.store("a", b"test data").unwrap();
/// assert_eq!(store.list("").unwrap()[0].size, 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
    failures: Mutex<u32>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls (of any kind) fail with
    /// [`StorageError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if no blob is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Removes a blob, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.blobs.write().remove(name).is_some()
    }

    fn check_fault(&self) -> StorageResult<()> {
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl BlobStore for InMemoryStore {
    fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>> {
        self.check_fault()?;
        let blobs = self.blobs.read();
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| BlobInfo {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    fn load(&self, name: &str) -> StorageResult<Bytes> {
        self.check_fault()?;
        self.blobs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.check_fault()?;
        self.blobs
            .write()
            .insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert!(store.list("").unwrap().is_empty());
    }

    #[test]
    fn memory_store_and_load() {
        let store = InMemoryStore::new();
        store.store("x", b"hello").unwrap();
        assert_eq!(&store.load("x").unwrap()[..], b"hello");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_store_replaces() {
        let store = InMemoryStore::new();
        store.store("x", b"one").unwrap();
        store.store("x", b"two!").unwrap();
        assert_eq!(&store.load("x").unwrap()[..], b"two!");
        assert_eq!(store.list("").unwrap()[0].size, 4);
    }

    #[test]
    fn memory_load_missing_fails() {
        let store = InMemoryStore::new();
        assert!(matches!(store.load("nope"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn memory_list_filters_by_prefix() {
        let store = InMemoryStore::new();
        store.store("a__1", b"1").unwrap();
        store.store("b__1", b"1").unwrap();
        store.store("a__2", b"22").unwrap();

        let names: Vec<_> = store
            .list("a__")
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["a__1".to_string(), "a__2".to_string()]);
    }

    #[test]
    fn memory_injected_failures() {
        let store = InMemoryStore::new();
        store.fail_next(2);
        assert!(store.store("x", b"1").is_err());
        assert!(store.list("").is_err());
        store.store("x", b"1").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_remove() {
        let store = InMemoryStore::new();
        store.store("x", b"1").unwrap();
        assert!(store.remove("x"));
        assert!(!store.remove("x"));
    }
}
