//! Filesystem blob store.

use crate::backend::{BlobInfo, BlobStore};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of in-progress writes; such files are never listed.
const TEMP_SUFFIX: &str = ".tmp";

/// A blob store backed by a directory.
///
/// Every blob is one file in the directory. Data survives process restarts
/// and the directory may be shared between instances (e.g. a network mount).
///
/// # Atomicity
///
/// `store` writes to a temporary file, syncs it, and renames it into place.
/// Readers therefore see either the old blob, no blob, or the complete new
/// one.
///
/// # Example
///
/// ```no_run
/// use tidesync_storage::{BlobStore, FsStore};
/// use std::path::Path;
///
/// let store = FsStore::open(Path::new("/var/lib/tidesync/blobs")).unwrap();
/// store.store("snapshot.cbor", b"data").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the directory holding the blobs.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.starts_with('.')
            || name.ends_with(TEMP_SUFFIX)
        {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

impl BlobStore for FsStore {
    fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>> {
        let mut blobs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) || name.ends_with(TEMP_SUFFIX) || name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            blobs.push(BlobInfo {
                name,
                size: metadata.len(),
            });
        }
        blobs.sort();
        Ok(blobs)
    }

    fn load(&self, name: &str) -> StorageResult<Bytes> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(name)?;
        let tmp = self.root.join(format!(".{name}{TEMP_SUFFIX}"));

        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(blob = name, size = data.len(), "stored blob");
        Ok(())
    }
}
