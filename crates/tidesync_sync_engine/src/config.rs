//! Configuration for the syncer and the sweeper.

use std::time::Duration;

/// How the application's tables relate to the sync headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Every stored value already starts with a sync header.
    #[default]
    Native,
    /// Tables hold plain values; headers live in shadow tables.
    Shadow,
}

/// Configuration for one replicated database.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of the replicated table set, shared by all instances.
    pub database_name: String,
    /// Unique name of this instance.
    pub instance_id: String,
    /// Host name recorded in outgoing snapshots.
    pub hostname: String,
    /// Schema mode.
    pub schema_mode: SchemaMode,
    /// Only load remote snapshots; never publish our own.
    pub receive_only: bool,
    /// How often the store is listed and the local database checked for
    /// changes.
    pub poll_interval: Duration,
    /// Retry configuration for storage calls.
    pub retry: RetryConfig,
    /// Maximum number of downloaded snapshots held in memory.
    pub max_held_snapshots: usize,
    /// Remote tombstones older than this are not inserted for keys we do
    /// not have.
    pub deleted_cutoff_age: Duration,
    /// Tables that are neither sent nor loaded.
    pub ignore_tables: Vec<String>,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(database_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            instance_id: instance_id.into(),
            hostname: "localhost".to_string(),
            schema_mode: SchemaMode::Native,
            receive_only: false,
            poll_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
            max_held_snapshots: 4,
            deleted_cutoff_age: SweeperConfig::DEFAULT_RETENTION,
            ignore_tables: Vec::new(),
        }
    }

    /// Sets the host name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the schema mode.
    pub fn with_schema_mode(mut self, mode: SchemaMode) -> Self {
        self.schema_mode = mode;
        self
    }

    /// Sets receive-only mode.
    pub fn with_receive_only(mut self, receive_only: bool) -> Self {
        self.receive_only = receive_only;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the number of snapshots that may be held in memory at once.
    pub fn with_max_held_snapshots(mut self, count: usize) -> Self {
        self.max_held_snapshots = count.max(1);
        self
    }

    /// Sets the age beyond which remote tombstones are not resurrected.
    ///
    /// Should match the sweeper retention.
    pub fn with_deleted_cutoff_age(mut self, age: Duration) -> Self {
        self.deleted_cutoff_age = age;
        self
    }

    /// Adds a table to the ignore list.
    pub fn ignore_table(mut self, table: impl Into<String>) -> Self {
        self.ignore_tables.push(table.into());
        self
    }

    /// True if `table` is on the ignore list.
    #[must_use]
    pub fn is_ignored(&self, table: &str) -> bool {
        self.ignore_tables.iter().any(|t| t == table)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default", "local")
    }
}

/// Configuration for retrying storage calls.
///
/// Retries use a fixed delay.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first included.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::from_secs(1),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Sets the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for the tombstone sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Whether [`crate::Sweeper::run`] sweeps at all.
    pub enabled: bool,
    /// Tombstones older than this are deleted.
    pub retention: Duration,
    /// Time between sweeps.
    pub interval: Duration,
    /// Longest time a single sweep transaction may hold the write lock.
    pub lock_duration: Duration,
    /// Pause between two sweep transactions.
    pub release_duration: Duration,
    /// Entries processed between two checks of the time and count limits.
    pub check_every: usize,
    /// Entries after which a sweep transaction commits regardless of time.
    pub max_entries_per_txn: usize,
}

impl SweeperConfig {
    /// Default tombstone retention.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            enabled: true,
            retention: Self::DEFAULT_RETENTION,
            interval: Duration::from_secs(3600),
            lock_duration: Duration::from_millis(100),
            release_duration: Duration::from_millis(50),
            check_every: 1000,
            max_entries_per_txn: 100_000,
        }
    }

    /// Sets the tombstone retention.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the interval between sweeps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the per-transaction time limit.
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    /// Sets the pause between transactions.
    pub fn with_release_duration(mut self, duration: Duration) -> Self {
        self.release_duration = duration;
        self
    }

    /// Sets how often the limits are checked.
    pub fn with_check_every(mut self, entries: usize) -> Self {
        self.check_every = entries.max(1);
        self
    }

    /// Sets the per-transaction entry limit.
    pub fn with_max_entries_per_txn(mut self, entries: usize) -> Self {
        self.max_entries_per_txn = entries.max(1);
        self
    }

    /// Disables sweeping.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("users", "node-a")
            .with_hostname("host-1")
            .with_schema_mode(SchemaMode::Shadow)
            .with_receive_only(true)
            .with_poll_interval(Duration::from_millis(200))
            .with_max_held_snapshots(0)
            .ignore_table("cache");

        assert_eq!(config.database_name, "users");
        assert_eq!(config.instance_id, "node-a");
        assert_eq!(config.hostname, "host-1");
        assert_eq!(config.schema_mode, SchemaMode::Shadow);
        assert!(config.receive_only);
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.max_held_snapshots, 1);
        assert!(config.is_ignored("cache"));
        assert!(!config.is_ignored("users"));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn cutoff_defaults_to_retention() {
        assert_eq!(
            SyncConfig::default().deleted_cutoff_age,
            SweeperConfig::default().retention
        );
    }

    #[test]
    fn sweeper_config_builder() {
        let config = SweeperConfig::new()
            .with_retention(Duration::from_secs(60))
            .with_check_every(0)
            .disabled();
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.check_every, 1);
        assert!(!config.enabled);
    }
}
