//! # tidesync storage
//!
//! Blob storage backends used as the transport between tidesync instances.
//!
//! Backends are **opaque blob stores**: they list, load and store named
//! immutable blobs and never interpret the snapshot bytes they hold.
//!
//! ## Design Principles
//!
//! - Three operations only: `list`, `load`, `store`
//! - `store` is atomic: readers never see a partially written blob
//! - `list` is eventually consistent with prior `store` calls
//! - Must be `Send + Sync` for use from background tasks
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and single-process setups
//! - [`FsStore`] - A directory on a local or shared filesystem
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{BlobStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.store("db__a__20240101-000000.000000000__g.cbor", b"hello").unwrap();
//! let blobs = store.list("db__").unwrap();
//! assert_eq!(blobs.len(), 1);
//! assert_eq!(&store.load(&blobs[0].name).unwrap()[..], b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fs;
mod memory;

pub use backend::{BlobInfo, BlobStore};
pub use error::{StorageError, StorageResult};
pub use fs::FsStore;
pub use memory::InMemoryStore;
