//! Tombstone garbage collection.
//!
//! Tombstones must outlive every snapshot that could still carry the
//! live value they replaced, so they are only removed once they are older
//! than the retention period. The sweeper scans in short write
//! transactions so that it never holds the write lock for long; a scan
//! that hits the time or entry limit commits and resumes after the last
//! entry it looked at.

use crate::clock;
use crate::config::{SchemaMode, SweeperConfig};
use crate::error::{SyncError, SyncResult};
use crate::shadow::{is_private, real_name};
use crate::shutdown::ShutdownSignal;
use std::time::{Duration, Instant};
use tidesync_codec::header;
use tidesync_core::{Env, Txn};
use tidesync_merge::MergeError;
use tracing::{debug, error, info};

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Live entries seen.
    pub live: u64,
    /// Tombstones kept because they are newer than the cutoff.
    pub retained: u64,
    /// Tombstones deleted.
    pub cleaned: u64,
    /// Write transactions committed.
    pub txns: u64,
}

impl SweepStats {
    fn add(&mut self, other: SweepStats) {
        self.live += other.live;
        self.retained += other.retained;
        self.cleaned += other.cleaned;
        self.txns += other.txns;
    }
}

/// Where a time-boxed scan stopped: the last entry it processed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Deletes expired tombstones from header-tagged tables.
#[derive(Debug, Clone)]
pub struct Sweeper {
    env: Env,
    config: SweeperConfig,
    mode: SchemaMode,
    ignore: Vec<String>,
}

impl Sweeper {
    /// Creates a sweeper for the tables of `mode`: shadow tables in shadow
    /// mode, application tables in native mode.
    pub fn new(env: Env, config: SweeperConfig, mode: SchemaMode) -> Self {
        Self {
            env,
            config,
            mode,
            ignore: Vec::new(),
        }
    }

    /// Excludes tables from sweeping.
    pub fn with_ignored(mut self, tables: Vec<String>) -> Self {
        self.ignore = tables;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Tables this sweeper scans.
    pub fn tables(&self) -> Vec<String> {
        let txn = self.env.begin_read();
        txn.table_names()
            .into_iter()
            .filter(|name| {
                let real = match self.mode {
                    SchemaMode::Shadow => real_name(name),
                    SchemaMode::Native => (!is_private(name)).then_some(name.as_str()),
                };
                let Some(real) = real else {
                    return false;
                };
                let dup_sort = txn.table_flags(name).map(|f| f.is_dup_sort()).unwrap_or(true);
                !dup_sort && !self.ignore.iter().any(|t| t == real)
            })
            .collect()
    }

    /// Sweeps every table once, deleting tombstones older than the
    /// configured retention.
    ///
    /// Blocks the calling thread for the pauses between transactions.
    ///
    /// # Errors
    ///
    /// Returns the first merge or database error. Work committed by
    /// earlier transactions of the sweep is kept.
    pub fn sweep_once(&self) -> SyncResult<SweepStats> {
        let cutoff = clock::cutoff(clock::now_ns(), self.config.retention);
        self.sweep(cutoff, None)
    }

    /// Sweeps every table once, deleting tombstones with a timestamp
    /// below `cutoff`.
    ///
    /// # Errors
    ///
    /// Same as [`Sweeper::sweep_once`].
    pub fn sweep_with_cutoff(&self, cutoff: u64) -> SyncResult<SweepStats> {
        self.sweep(cutoff, None)
    }

    /// Sweeps on the configured interval until `signal` fires.
    pub async fn run(self, mut signal: ShutdownSignal) {
        if !self.config.enabled {
            info!("sweeper disabled");
            return;
        }
        loop {
            let sweeper = self.clone();
            let stop = signal.clone();
            let cutoff = clock::cutoff(clock::now_ns(), self.config.retention);
            let result =
                tokio::task::spawn_blocking(move || sweeper.sweep(cutoff, Some(&stop))).await;
            match result {
                Ok(Ok(stats)) => info!(
                    live = stats.live,
                    retained = stats.retained,
                    cleaned = stats.cleaned,
                    txns = stats.txns,
                    "sweep finished"
                ),
                Ok(Err(SyncError::Cancelled)) => return,
                Ok(Err(err)) => error!(error = %err, "sweep failed"),
                Err(err) => error!(error = %err, "sweep task failed"),
            }
            if signal.sleep(self.config.interval).await.is_err() {
                return;
            }
        }
    }

    fn sweep(&self, cutoff: u64, signal: Option<&ShutdownSignal>) -> SyncResult<SweepStats> {
        let mut total = SweepStats::default();
        for table in self.tables() {
            let mut resume: Option<Position> = None;
            loop {
                if signal.is_some_and(ShutdownSignal::is_triggered) {
                    return Err(SyncError::Cancelled);
                }
                let (stats, next) = self.sweep_slice(&table, cutoff, resume.as_ref())?;
                total.add(stats);
                match next {
                    Some(position) => {
                        resume = Some(position);
                        self.pause(signal)?;
                    }
                    None => break,
                }
            }
            debug!(table = %table, cleaned = total.cleaned, "table swept");
        }
        Ok(total)
    }

    /// Waits out the release pause between transactions in short steps,
    /// giving up as soon as `signal` fires.
    fn pause(&self, signal: Option<&ShutdownSignal>) -> SyncResult<()> {
        const STEP: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + self.config.release_duration;
        loop {
            if signal.is_some_and(ShutdownSignal::is_triggered) {
                return Err(SyncError::Cancelled);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            std::thread::sleep(left.min(STEP));
        }
    }

    /// Scans one table from `resume` (or the start) in a single write
    /// transaction, stopping early once a limit is hit.
    fn sweep_slice(
        &self,
        table: &str,
        cutoff: u64,
        resume: Option<&Position>,
    ) -> SyncResult<(SweepStats, Option<Position>)> {
        let mut txn = self.env.begin_write();
        if !txn.has_table(table) {
            return Ok((SweepStats::default(), None));
        }
        let started = Instant::now();
        let mut cursor = txn.cursor(table)?;
        let mut entry = match resume {
            None => cursor.first(&txn)?,
            // Skip the resume entry only if it is still there unchanged.
            Some(pos) => match cursor.set_range(&txn, &pos.key)? {
                Some((k, v)) if k == pos.key && v == pos.value => cursor.next(&txn)?,
                other => other,
            },
        };

        let mut stats = SweepStats {
            txns: 1,
            ..SweepStats::default()
        };
        let check_every = self.config.check_every.max(1);
        let mut seen = 0usize;
        let mut stopped_at = None;
        while let Some((key, value)) = entry {
            let (h, _) = header::parse(&value).map_err(|e| MergeError::header(table, &key, e))?;
            if !h.is_deleted() {
                stats.live += 1;
            } else if h.timestamp >= cutoff {
                stats.retained += 1;
            } else {
                txn.delete(table, &key)?;
                stats.cleaned += 1;
            }

            seen += 1;
            if seen % check_every == 0
                && (seen >= self.config.max_entries_per_txn
                    || started.elapsed() >= self.config.lock_duration)
            {
                stopped_at = Some(Position { key, value });
                break;
            }
            entry = cursor.next(&txn)?;
        }
        let txn_id = txn.commit()?;
        debug!(
            table,
            txn_id = %txn_id,
            cleaned = stats.cleaned,
            done = stopped_at.is_none(),
            "sweep transaction"
        );
        Ok((stats, stopped_at))
    }
}
