//! The send/load cycle of one replicated database.

use crate::clock;
use crate::config::{SchemaMode, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::limit::ConcurrencyLimit;
use crate::receiver::{HeldSnapshot, Receiver};
use crate::retry::with_retry;
use crate::shadow::{is_private, real_name, real_to_shadow, shadow_flags, shadow_name, shadow_to_main};
use crate::shutdown::ShutdownSignal;
use crate::stats::SyncStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tidesync_codec::{escape_key, Snapshot, SnapshotMeta, SnapshotName, SnapshotTable};
use tidesync_core::{Env, KeyOrder, TableFlags, Txn, TxnId, WriteTxn};
use tidesync_merge::{read_entries, NativeIterator, SinkTable, Strategy};
use tidesync_storage::BlobStore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct SyncState {
    /// Last transaction id produced or observed by the syncer itself. A
    /// committed id beyond it means the application wrote something.
    last_own_txn: TxnId,
    last_sent: Option<String>,
}

/// Publishes local snapshots and merges remote ones for one database.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tidesync_core::{Env, EnvConfig};
/// use tidesync_storage::InMemoryStore;
/// use tidesync_sync_engine::{SyncConfig, Syncer};
///
/// let env = Env::open(EnvConfig::default());
/// let store = Arc::new(InMemoryStore::new());
/// let syncer = Syncer::new(env, store, SyncConfig::new("users", "node-a"));
/// assert!(!syncer.local_changed());
/// ```
pub struct Syncer {
    env: Env,
    store: Arc<dyn BlobStore>,
    config: SyncConfig,
    generation: String,
    limit: ConcurrencyLimit,
    state: Mutex<SyncState>,
    stats: Arc<Mutex<SyncStats>>,
}

impl Syncer {
    /// Creates a syncer with a fresh generation id.
    pub fn new(env: Env, store: Arc<dyn BlobStore>, config: SyncConfig) -> Self {
        let limit = ConcurrencyLimit::new(config.max_held_snapshots);
        Self {
            env,
            store,
            config,
            generation: uuid::Uuid::new_v4().to_string(),
            limit,
            state: Mutex::new(SyncState::default()),
            stats: Arc::default(),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Generation id written into the names of our snapshots.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Current counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().clone()
    }

    /// Name of the last snapshot we published.
    pub fn last_sent(&self) -> Option<String> {
        self.state.lock().last_sent.clone()
    }

    /// True if the database was written by someone other than the syncer
    /// since its last send or load.
    pub fn local_changed(&self) -> bool {
        self.env.last_txn_id() > self.state.lock().last_own_txn
    }

    /// True if any replicated table has entries.
    pub fn has_data(&self) -> SyncResult<bool> {
        let txn = self.env.begin_read();
        for name in txn.table_names() {
            if self.is_replicated(&name) && !txn.is_empty(&name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_replicated(&self, table: &str) -> bool {
        !is_private(table) && !self.config.is_ignored(table)
    }

    /// Builds a snapshot of the local database.
    ///
    /// In shadow mode this first records local changes in the shadow
    /// tables, in a write transaction. Returns the snapshot together with
    /// the id of the transaction whose state it holds.
    ///
    /// # Errors
    ///
    /// Returns a database or merge error, or
    /// [`SyncError::UnsupportedTable`] for a duplicate-sorted table in
    /// native mode.
    pub fn build_snapshot(&self) -> SyncResult<(Snapshot, TxnId)> {
        let now = clock::now_ns();
        let (tables, txn_id) = match self.config.schema_mode {
            SchemaMode::Native => {
                let txn = self.env.begin_read();
                (self.export_native(&txn)?, txn.id())
            }
            SchemaMode::Shadow => {
                let mut txn = self.env.begin_write();
                real_to_shadow(&mut txn, now, &self.config.ignore_tables)?;
                let tables = self.export_shadow(&txn)?;
                // A transaction that changed nothing does not advance the
                // committed id, so commit reports the id actually visible.
                (tables, txn.commit()?)
            }
        };

        let mut snapshot = Snapshot::new(SnapshotMeta {
            instance_id: self.config.instance_id.clone(),
            generation_id: self.generation.clone(),
            hostname: self.config.hostname.clone(),
            database_name: self.config.database_name.clone(),
            source_txn_id: txn_id.as_u64(),
            timestamp: now,
        });
        snapshot.tables = tables;
        Ok((snapshot, txn_id))
    }

    fn export_native<T: Txn + ?Sized>(&self, txn: &T) -> SyncResult<Vec<SnapshotTable>> {
        let mut tables = Vec::new();
        for name in txn.table_names() {
            if !self.is_replicated(&name) {
                continue;
            }
            let flags = txn.table_flags(&name)?;
            if flags.is_dup_sort() {
                return Err(SyncError::unsupported_table(
                    name,
                    "duplicate-sorted tables need shadow mode",
                ));
            }
            let mut table = SnapshotTable::new(name.as_str(), flags.bits());
            table.entries = read_entries(txn, &name)?;
            tables.push(table);
        }
        Ok(tables)
    }

    fn export_shadow<T: Txn + ?Sized>(&self, txn: &T) -> SyncResult<Vec<SnapshotTable>> {
        let mut tables = Vec::new();
        for name in txn.table_names() {
            let Some(real) = real_name(&name) else {
                continue;
            };
            if self.config.is_ignored(real) {
                continue;
            }
            let flags = if txn.has_table(real) {
                txn.table_flags(real)?
            } else {
                txn.table_flags(&name)?
            };
            let mut table = SnapshotTable::new(real, flags.bits());
            table.entries = read_entries(txn, &name)?;
            tables.push(table);
        }
        Ok(tables)
    }

    /// Publishes a snapshot of the local database.
    ///
    /// Does nothing in receive-only mode. Returns the id of the
    /// transaction the snapshot was taken from.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Syncer::build_snapshot`], the storage error
    /// once retries are exhausted, or [`SyncError::Cancelled`].
    pub async fn send_once(&self, signal: &mut ShutdownSignal) -> SyncResult<TxnId> {
        if self.config.receive_only {
            debug!("receive-only, not sending");
            return Ok(self.env.last_txn_id());
        }
        let (snapshot, txn_id) = self.build_snapshot()?;
        let data = snapshot.encode()?;
        let name = SnapshotName::new(
            self.config.database_name.as_str(),
            self.config.instance_id.as_str(),
            snapshot.meta.timestamp,
            self.generation.as_str(),
        )?
        .to_string();

        let store = Arc::clone(&self.store);
        let mut retries = 0;
        let stored = with_retry(&self.config.retry, "store", signal, &mut retries, || {
            Ok(store.store(&name, &data)?)
        })
        .await;
        {
            let mut stats = self.stats.lock();
            stats.store_retries += retries;
            if stored.is_ok() {
                stats.snapshots_sent += 1;
                stats.last_sync_time = Some(Instant::now());
            }
        }
        stored?;

        info!(
            snapshot = %name,
            txn_id = %txn_id,
            tables = snapshot.tables.len(),
            entries = snapshot.entry_count(),
            size = data.len(),
            "snapshot sent"
        );
        let mut state = self.state.lock();
        state.last_own_txn = state.last_own_txn.max(txn_id);
        state.last_sent = Some(name);
        Ok(txn_id)
    }

    /// Merges a remote snapshot into the local database in one write
    /// transaction and returns the committed transaction id.
    ///
    /// Every entry goes through last-writer-wins against the local entry.
    /// Local keys missing from the snapshot are left alone. Tables with
    /// private names are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSnapshot`] for a table the local store
    /// could not hold, or a merge or database error; nothing of the
    /// snapshot is applied then.
    pub fn load_once(&self, snapshot: &Snapshot) -> SyncResult<TxnId> {
        self.validate(snapshot)?;
        let now = clock::now_ns();
        let cutoff = clock::cutoff(now, self.config.deleted_cutoff_age);
        let shadow = self.config.schema_mode == SchemaMode::Shadow;
        let ignore = &self.config.ignore_tables;
        let instance = snapshot.meta.instance_id.as_str();

        let mut txn = self.env.begin_write();
        let last_own = self.state.lock().last_own_txn;
        // Ids of our own transactions follow each other, so a gap means
        // the application committed in between.
        let local_changed = txn.id().as_u64() > last_own.as_u64() + 1;
        if shadow && local_changed {
            real_to_shadow(&mut txn, now, ignore)?;
        }

        for table in &snapshot.tables {
            if is_private(&table.name) {
                warn!(instance, table = %table.name, "ignoring private table in remote snapshot");
                continue;
            }
            if self.config.is_ignored(&table.name) {
                continue;
            }
            let flags = TableFlags::from_bits(table.flags);
            let target = if shadow {
                ensure_table(&mut txn, &table.name, flags)?;
                let name = shadow_name(&table.name);
                ensure_table(&mut txn, &name, shadow_flags(flags))?;
                name
            } else {
                if flags.is_dup_sort() {
                    return Err(SyncError::unsupported_table(
                        table.name.as_str(),
                        "duplicate-sorted tables need shadow mode",
                    ));
                }
                ensure_table(&mut txn, &table.name, flags)?;
                table.name.clone()
            };

            let txn_id = txn.id().as_u64();
            let mut source = NativeIterator::new(target.as_str(), &table.entries, txn_id)
                .with_default_timestamp(now)
                .with_deleted_cutoff(cutoff)
                .with_format_version(snapshot.format_version);
            let mut sink = SinkTable::open(&mut txn, &target)?;
            let strategy = if sink.is_empty()? {
                Strategy::Append
            } else {
                Strategy::Update
            };
            strategy.apply(&mut sink, &mut source)?;
            debug!(instance, table = %table.name, ?strategy, entries = table.entries.len(), "table merged");
        }

        if shadow {
            shadow_to_main(&mut txn, ignore)?;
        }
        let txn_id = txn.commit()?;

        {
            let mut state = self.state.lock();
            if !local_changed && txn_id > state.last_own_txn {
                state.last_own_txn = txn_id;
            }
        }
        let mut stats = self.stats.lock();
        stats.snapshots_loaded += 1;
        stats.last_sync_time = Some(Instant::now());
        Ok(txn_id)
    }

    /// Checks table names and keys of a remote snapshot against the limits
    /// of the local store before anything is written.
    fn validate(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let max = self.env.config().max_key_size;
        for table in &snapshot.tables {
            if is_private(&table.name) || self.config.is_ignored(&table.name) {
                continue;
            }
            if table.name.is_empty() {
                return Err(SyncError::invalid_snapshot("", "empty table name"));
            }
            let flags = TableFlags::from_bits(table.flags);
            if flags.is_integer_key() && flags.is_dup_sort() {
                return Err(SyncError::invalid_snapshot(
                    table.name.as_str(),
                    "INTEGER_KEY combined with DUP_SORT",
                ));
            }
            let order = KeyOrder::for_flags(shadow_flags(flags));
            let width = table.entries.first().map_or(0, |e| e.key.len());
            for entry in &table.entries {
                let len = entry.key.len();
                if len == 0 || len > max {
                    return Err(SyncError::invalid_snapshot(
                        table.name.as_str(),
                        format!("key of {len} bytes at {}, limit {max}", escape_key(&entry.key)),
                    ));
                }
                if order == KeyOrder::IntegerLe && (!order.is_valid(&entry.key) || len != width) {
                    return Err(SyncError::invalid_snapshot(
                        table.name.as_str(),
                        format!("integer key {} of {len} bytes", escape_key(&entry.key)),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Creates a receiver sharing this syncer's limit and counters.
    pub fn receiver(&self, signal: ShutdownSignal) -> Receiver {
        Receiver::new(
            Arc::clone(&self.store),
            &self.config,
            self.limit.clone(),
            Arc::clone(&self.stats),
            signal,
        )
    }

    /// Runs the sync loop until `signal` fires.
    ///
    /// After the first listing, publishes a snapshot if the database has
    /// data but the store has none of ours. Then, on every remote snapshot
    /// and every poll tick, merges what was downloaded and publishes if
    /// the database changed locally.
    ///
    /// Storage failures and bad remote snapshots are logged and counted;
    /// the loop carries on.
    ///
    /// # Errors
    ///
    /// Returns a database error, which leaves the local database in an
    /// unknown state.
    pub async fn run(&self, signal: ShutdownSignal) -> SyncResult<()> {
        match self.run_loop(signal).await {
            Err(SyncError::Cancelled) => {
                info!(instance = %self.config.instance_id, "sync loop stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn run_loop(&self, mut signal: ShutdownSignal) -> SyncResult<()> {
        let mut receiver = self.receiver(signal.clone());
        let listing = loop {
            match receiver.poll().await {
                Ok(listing) => break listing,
                Err(err) => {
                    self.recover(err)?;
                    signal.sleep(self.config.poll_interval).await?;
                }
            }
        };
        info!(
            instance = %self.config.instance_id,
            remote_instances = listing.remote_instances,
            own_snapshots = listing.own_snapshots,
            "sync loop started"
        );
        if listing.own_snapshots == 0 && !self.config.receive_only && self.has_data()? {
            self.try_send(&mut signal).await?;
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            for held in receiver.take_pending() {
                self.apply(&receiver, held)?;
            }
            if !self.config.receive_only && self.local_changed() {
                self.try_send(&mut signal).await?;
            }

            let event = tokio::select! {
                _ = signal.cancelled() => Event::Stop,
                _ = receiver.wait_pending() => Event::Pending,
                _ = ticker.tick() => Event::Tick,
            };
            match event {
                Event::Stop => return Err(SyncError::Cancelled),
                Event::Pending => {}
                Event::Tick => {
                    if let Err(err) = receiver.poll().await {
                        self.recover(err)?;
                    }
                }
            }
        }
    }

    fn apply(&self, receiver: &Receiver, held: HeldSnapshot) -> SyncResult<()> {
        match self.load_once(&held.snapshot) {
            Ok(txn_id) => {
                info!(snapshot = %held.name, txn_id = %txn_id, "snapshot loaded");
                Ok(())
            }
            Err(err) if err.is_bad_snapshot() => {
                error!(snapshot = %held.name, error = %err, "ignoring snapshot that cannot be merged");
                receiver.ignore(&held.name);
                self.record(&err);
                Ok(())
            }
            Err(err) => {
                error!(snapshot = %held.name, error = %err, "loading snapshot failed");
                self.recover(err)
            }
        }
    }

    async fn try_send(&self, signal: &mut ShutdownSignal) -> SyncResult<()> {
        match self.send_once(signal).await {
            Ok(_) => Ok(()),
            Err(err) => self.recover(err),
        }
    }

    /// Records a failed step and decides whether the loop can go on.
    fn recover(&self, err: SyncError) -> SyncResult<()> {
        self.record(&err);
        if matches!(err, SyncError::Cancelled) {
            return Err(err);
        }
        if err.is_fatal() {
            error!(error = %err, "stopping sync loop");
            return Err(err);
        }
        Ok(())
    }

    fn record(&self, err: &SyncError) {
        if !matches!(err, SyncError::Cancelled) {
            self.stats.lock().last_error = Some(err.to_string());
        }
    }
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("config", &self.config)
            .field("generation", &self.generation)
            .finish()
    }
}

enum Event {
    Stop,
    Pending,
    Tick,
}

/// Creates `name` unless it exists; an existing table must have `flags`.
fn ensure_table(txn: &mut WriteTxn<'_>, name: &str, flags: TableFlags) -> SyncResult<()> {
    if !txn.has_table(name) {
        txn.create_table(name, flags)?;
        return Ok(());
    }
    let existing = txn.table_flags(name)?;
    if existing != flags {
        return Err(SyncError::unsupported_table(
            name,
            format!("local flags {:#x} differ from remote {:#x}", existing.bits(), flags.bits()),
        ));
    }
    Ok(())
}
