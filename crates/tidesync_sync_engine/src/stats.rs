//! Sync counters.

use std::time::Instant;

/// Counters of a [`crate::Syncer`] and its receiver.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Snapshots published.
    pub snapshots_sent: u64,
    /// Remote snapshots merged.
    pub snapshots_loaded: u64,
    /// Remote snapshots ignored for good because they could not be decoded
    /// or merged.
    pub snapshots_ignored: u64,
    /// Retried store listings.
    pub list_retries: u64,
    /// Retried snapshot downloads.
    pub load_retries: u64,
    /// Retried snapshot uploads.
    pub store_retries: u64,
    /// Last time a snapshot was sent or loaded.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}
