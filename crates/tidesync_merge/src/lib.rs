//! # tidesync merge
//!
//! Reconciles a sorted change set with a table of the embedded store.
//!
//! This crate provides:
//! - The [`SyncIterator`] contract: a sorted source plus its conflict policy
//! - [`merge_join`], a single forward pass over source and table
//! - Write [`Strategy`] variants built on it
//! - Conflict policies: [`NativeIterator`] (last writer wins on header
//!   timestamps), [`PlainIterator`] and [`ShadowIterator`]
//! - [`SinkTable`] and [`TableTransform`] for duplicate-sorted tables
//!
//! Everything here runs synchronously inside one write transaction.
//!
//! ## Example
//!
//! ```
//! use tidesync_codec::Entry;
//! use tidesync_core::{Env, EnvConfig, TableFlags, Txn};
//! use tidesync_merge::{NativeIterator, SinkTable, Strategy};
//!
//! let env = Env::open(EnvConfig::default());
//! let mut txn = env.begin_write();
//! txn.create_table("users", TableFlags::NONE).unwrap();
//!
//! let entries = vec![Entry::new(&b"alice"[..], &b"1"[..], 10, 0)];
//! let txn_id = txn.id().as_u64();
//! let mut source = NativeIterator::new("users", &entries, txn_id);
//! let mut sink = SinkTable::open(&mut txn, "users").unwrap();
//! let strategy = Strategy::select(sink.is_empty().unwrap());
//! strategy.apply(&mut sink, &mut source).unwrap();
//! txn.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod iterator;
mod join;
mod native;
mod plain;
mod shadow;
mod sink;
mod strategy;

pub use error::{MergeError, MergeResult};
pub use iterator::SyncIterator;
pub use join::{merge_join, MergeStep};
pub use native::NativeIterator;
pub use plain::PlainIterator;
pub use shadow::ShadowIterator;
pub use sink::{read_entries, read_sync_entries, SinkTable, TableTransform};
pub use strategy::Strategy;
