//! # tidesync sync engine
//!
//! Replicates an embedded database through an object store.
//!
//! This crate provides:
//! - The [`Syncer`]: publishes snapshots of the local database and merges
//!   the newest snapshot of every other instance into it
//! - A [`Receiver`] with one downloader task per remote instance
//! - Shadow tables ([`real_to_shadow`], [`shadow_to_main`]) for databases
//!   whose values carry no sync header
//! - The tombstone [`Sweeper`]
//! - Fixed-delay retries, a [`ConcurrencyLimit`] on held snapshots and
//!   cooperative cancellation through [`Shutdown`]
//!
//! ## Architecture
//!
//! Instances never talk to each other. Each one periodically writes an
//! immutable snapshot blob named
//! `<database>__<instance>__<timestamp>__<generation>.cbor` and loads the
//! newest blob of every other instance. Merging is per key,
//! last writer wins on header timestamps with a deterministic tie-break,
//! so all instances converge once they have seen the same snapshots.
//!
//! ## Key Invariants
//!
//! - A snapshot is merged in a single write transaction
//! - Local keys missing from a remote snapshot are never deleted by it
//! - Deletions travel as tombstones until the sweeper removes them
//! - Tables named `_sync*` are private and never replicated
//! - Database errors stop the sync loop; storage errors are retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod limit;
mod receiver;
mod retry;
mod shadow;
mod shutdown;
mod stats;
mod sweeper;
mod syncer;

pub use config::{RetryConfig, SchemaMode, SweeperConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use limit::{ConcurrencyLimit, Token};
pub use receiver::{HeldSnapshot, Listing, Receiver};
pub use shadow::{
    is_private, real_name, real_to_shadow, shadow_flags, shadow_name, shadow_to_main,
    PRIVATE_PREFIX, SHADOW_PREFIX,
};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use stats::SyncStats;
pub use sweeper::{SweepStats, Sweeper};
pub use syncer::Syncer;
