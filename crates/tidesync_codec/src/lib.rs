//! # tidesync codec
//!
//! Byte-level formats shared by every tidesync instance.
//!
//! This crate provides:
//! - The versioned value [`header`] stored in front of every replicated value
//! - The [`snapshot`] container exchanged through blob storage
//! - Snapshot blob [`name`] formatting and parsing
//!
//! ## Header layout
//!
//! ```text
//! 0..8    timestamp (u64 BE, ns since epoch)
//! 8..16   writer transaction id (u64 BE)
//! 16      format version (0)
//! 17      flags (bit0 = deleted)
//! 18..22  reserved (zero)
//! 22..24  extension block count (u16 BE)
//! 24..    8 * count bytes of extension data, then the application value
//! ```
//!
//! ## Usage
//!
//! ```
//! use tidesync_codec::header::{self, Flags};
//!
//! let mut value = Vec::new();
//! header::write_basic(&mut value, 42, 7, Flags::NONE);
//! value.extend_from_slice(b"payload");
//!
//! let (h, rest) = header::parse(&value).unwrap();
//! assert_eq!(h.timestamp, 42);
//! assert_eq!(rest, b"payload");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod escape;
pub mod header;
pub mod name;
pub mod snapshot;

pub use error::{CodecError, CodecResult, HeaderError, HeaderResult, NameError};
pub use escape::escape_key;
pub use header::{Flags, Header};
pub use name::SnapshotName;
pub use snapshot::{Entry, Snapshot, SnapshotMeta, SnapshotTable};
