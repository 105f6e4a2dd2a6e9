//! # tidesync testkit
//!
//! Test utilities shared by the tidesync crates.
//!
//! This crate provides:
//! - Fixtures for environments, header-tagged values and blob stores
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```
//! use tidesync_testkit::prelude::*;
//!
//! let env = env_with_table("users");
//! put_tagged(&env, "users", b"alice", 10, b"1");
//! assert_eq!(read_tagged(&env, "users").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}
