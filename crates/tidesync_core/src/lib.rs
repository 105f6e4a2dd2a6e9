//! # tidesync core
//!
//! An embedded, LMDB-style sorted key-value environment.
//!
//! This crate provides:
//! - Named tables with byte-ordered, integer-ordered or duplicate-sorted keys
//! - Single-writer / multi-reader transactions with copy-on-write snapshots
//! - Monotonic transaction ids that only advance when a write commits changes
//! - Forward cursors that stay valid while the same transaction deletes keys
//!
//! ## Example
//!
//! ```
//! use tidesync_core::{Env, EnvConfig, TableFlags, Txn};
//!
//! let env = Env::open(EnvConfig::default());
//! let mut txn = env.begin_write();
//! txn.create_table("users", TableFlags::NONE).unwrap();
//! txn.put("users", b"alice", b"1").unwrap();
//! let id = txn.commit().unwrap();
//!
//! let read = env.begin_read();
//! assert_eq!(read.id(), id);
//! assert_eq!(read.get("users", b"alice").unwrap().as_deref(), Some(&b"1"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod cursor;
pub mod dupkey;
mod env;
mod error;
mod table;
mod transaction;
mod types;

pub use config::EnvConfig;
pub use cursor::{Cursor, CursorEntry};
pub use env::{Env, EnvInfo};
pub use error::{CoreError, CoreResult};
pub use transaction::{ReadTxn, StateRef, Txn, WriteTxn};
pub use types::{KeyOrder, TableFlags, TxnId};
