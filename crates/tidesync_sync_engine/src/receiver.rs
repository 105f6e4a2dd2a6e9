//! Discovery and download of remote snapshots.
//!
//! Each remote instance gets a downloader task that fetches the newest
//! snapshot it has been told about. At most one downloaded snapshot per
//! instance waits to be merged; a newer one replaces it. Every held
//! snapshot owns a [`Token`] from the shared [`ConcurrencyLimit`], which
//! bounds the memory spent on snapshots.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::limit::{ConcurrencyLimit, Token};
use crate::retry::{with_retry, FailureLog};
use crate::shutdown::ShutdownSignal;
use crate::stats::SyncStats;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tidesync_codec::{Snapshot, SnapshotName};
use tidesync_storage::BlobStore;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A downloaded remote snapshot waiting to be merged.
#[derive(Debug)]
pub struct HeldSnapshot {
    /// Blob name.
    pub name: SnapshotName,
    /// Decoded content.
    pub snapshot: Snapshot,
    token: Token,
}

impl HeldSnapshot {
    /// True while the snapshot counts against the concurrency limit.
    pub fn holds_permit(&self) -> bool {
        self.token.is_held()
    }
}

/// Result of one listing of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Listing {
    /// Snapshots published by this instance.
    pub own_snapshots: usize,
    /// Remote instances with at least one usable snapshot.
    pub remote_instances: usize,
    /// Remote instances whose newest snapshot was not seen before.
    pub new_snapshots: usize,
}

struct Shared {
    store: Arc<dyn BlobStore>,
    retry: RetryConfig,
    limit: ConcurrencyLimit,
    pending: Mutex<BTreeMap<String, HeldSnapshot>>,
    notify: Notify,
    ignored: Mutex<HashSet<String>>,
    stats: Arc<Mutex<SyncStats>>,
}

struct Downloader {
    newest: watch::Sender<Option<SnapshotName>>,
    handle: JoinHandle<()>,
}

/// Watches the store for remote snapshots of one database.
pub struct Receiver {
    shared: Arc<Shared>,
    database: String,
    instance: String,
    downloaders: HashMap<String, Downloader>,
    signal: ShutdownSignal,
}

impl Receiver {
    /// Creates a receiver for `config`'s database, ignoring snapshots of
    /// `config`'s own instance.
    pub fn new(
        store: Arc<dyn BlobStore>,
        config: &SyncConfig,
        limit: ConcurrencyLimit,
        stats: Arc<Mutex<SyncStats>>,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                retry: config.retry.clone(),
                limit,
                pending: Mutex::new(BTreeMap::new()),
                notify: Notify::new(),
                ignored: Mutex::new(HashSet::new()),
                stats,
            }),
            database: config.database_name.clone(),
            instance: config.instance_id.clone(),
            downloaders: HashMap::new(),
            signal,
        }
    }

    /// Lists the store and hands the newest snapshot of every remote
    /// instance to its downloader.
    ///
    /// # Errors
    ///
    /// Returns the storage error once retries are exhausted, or
    /// [`SyncError::Cancelled`].
    pub async fn poll(&mut self) -> SyncResult<Listing> {
        let prefix = SnapshotName::database_prefix(&self.database);
        let store = Arc::clone(&self.shared.store);
        let mut retries = 0;
        let blobs = with_retry(&self.shared.retry, "list", &mut self.signal, &mut retries, || {
            Ok(store.list(&prefix)?)
        })
        .await;
        self.shared.stats.lock().list_retries += retries;
        let blobs = blobs?;

        let mut listing = Listing::default();
        let mut newest: BTreeMap<String, SnapshotName> = BTreeMap::new();
        {
            let mut ignored = self.shared.ignored.lock();
            // Names gone from the store cannot come back; forget them.
            let listed: HashSet<&str> = blobs.iter().map(|b| b.name.as_str()).collect();
            ignored.retain(|name| listed.contains(name.as_str()));
            for blob in &blobs {
                let name = match SnapshotName::parse(&blob.name) {
                    Ok(name) => name,
                    Err(err) => {
                        debug!(blob = %blob.name, error = %err, "skipping foreign blob");
                        continue;
                    }
                };
                if name.database != self.database {
                    continue;
                }
                if name.instance == self.instance {
                    listing.own_snapshots += 1;
                    continue;
                }
                if ignored.contains(&blob.name) {
                    continue;
                }
                match newest.get(&name.instance) {
                    Some(current) if !is_newer(&name, current) => {}
                    _ => {
                        newest.insert(name.instance.clone(), name);
                    }
                }
            }
        }

        listing.remote_instances = newest.len();
        for (instance, name) in newest {
            if !self.downloaders.contains_key(&instance) {
                info!(instance = %instance, "new remote instance");
                let downloader =
                    Downloader::spawn(Arc::clone(&self.shared), instance.clone(), self.signal.clone());
                self.downloaders.insert(instance.clone(), downloader);
            }
            let Some(downloader) = self.downloaders.get(&instance) else {
                continue;
            };
            let updated = downloader.newest.send_if_modified(|current| {
                let newer = current.as_ref().map_or(true, |c| is_newer(&name, c));
                if newer {
                    *current = Some(name.clone());
                }
                newer
            });
            if updated {
                debug!(snapshot = %name, "new remote snapshot");
                listing.new_snapshots += 1;
            }
        }
        Ok(listing)
    }

    /// Takes every downloaded snapshot, oldest instance name first.
    pub fn take_pending(&self) -> Vec<HeldSnapshot> {
        std::mem::take(&mut *self.shared.pending.lock())
            .into_values()
            .collect()
    }

    /// Completes when a downloader has stored a snapshot since the last
    /// call. May complete with nothing pending.
    pub async fn wait_pending(&self) {
        self.shared.notify.notified().await;
    }

    /// Never downloads `name` again.
    pub fn ignore(&self, name: &SnapshotName) {
        if self.shared.ignored.lock().insert(name.to_string()) {
            self.shared.stats.lock().snapshots_ignored += 1;
        }
    }

    /// True if `name` was ignored.
    pub fn is_ignored(&self, name: &SnapshotName) -> bool {
        self.shared.ignored.lock().contains(&name.to_string())
    }

    /// Number of remote instances seen so far.
    pub fn instance_count(&self) -> usize {
        self.downloaders.len()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        for downloader in self.downloaders.values() {
            downloader.handle.abort();
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("database", &self.database)
            .field("instance", &self.instance)
            .field("downloaders", &self.downloaders.len())
            .finish()
    }
}

fn is_newer(a: &SnapshotName, b: &SnapshotName) -> bool {
    (a.timestamp_ns, a.to_string()) > (b.timestamp_ns, b.to_string())
}

impl Downloader {
    fn spawn(shared: Arc<Shared>, instance: String, signal: ShutdownSignal) -> Self {
        let (newest, rx) = watch::channel(None);
        let handle = tokio::spawn(download_loop(shared, instance, rx, signal));
        Self { newest, handle }
    }
}

async fn download_loop(
    shared: Arc<Shared>,
    instance: String,
    mut rx: watch::Receiver<Option<SnapshotName>>,
    mut signal: ShutdownSignal,
) {
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = signal.cancelled() => return,
        }
        let Some(name) = rx.borrow_and_update().clone() else {
            continue;
        };
        match fetch(&shared, &name, &rx, &mut signal).await {
            Ok(Some(held)) => {
                debug!(instance = %instance, snapshot = %name, "snapshot downloaded");
                // A snapshot still waiting here is superseded; dropping it
                // returns its permit.
                shared.pending.lock().insert(instance.clone(), held);
                shared.notify.notify_one();
            }
            Ok(None) => {}
            Err(SyncError::Cancelled) => return,
            Err(err) => warn!(instance = %instance, snapshot = %name, error = %err, "download failed"),
        }
    }
}

/// Downloads and decodes one snapshot.
///
/// Transient failures are retried with the fixed delay until the download
/// succeeds or a newer snapshot is announced. Returns `None` for a
/// superseded, missing or corrupt snapshot.
async fn fetch(
    shared: &Shared,
    name: &SnapshotName,
    rx: &watch::Receiver<Option<SnapshotName>>,
    signal: &mut ShutdownSignal,
) -> SyncResult<Option<HeldSnapshot>> {
    let token = shared.limit.acquire(signal).await?;
    let blob = name.to_string();
    let mut log = FailureLog::default();
    let data = loop {
        match shared.store.load(&blob) {
            Ok(data) => break data,
            Err(err) => {
                let err = SyncError::from(err);
                if !err.is_retryable() {
                    warn!(snapshot = %blob, error = %err, "snapshot unavailable");
                    return Ok(None);
                }
                log.failed("load", &err);
                shared.stats.lock().load_retries += 1;
                signal.sleep(shared.retry.delay).await?;
                if rx.has_changed().unwrap_or(true) {
                    return Ok(None);
                }
            }
        }
    };

    match Snapshot::decode(&data) {
        Ok(snapshot) => Ok(Some(HeldSnapshot {
            name: name.clone(),
            snapshot,
            token,
        })),
        Err(err) => {
            warn!(snapshot = %blob, error = %err, "ignoring undecodable snapshot");
            if shared.ignored.lock().insert(blob) {
                shared.stats.lock().snapshots_ignored += 1;
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use std::time::Duration;
    use tidesync_storage::InMemoryStore;
    use tidesync_testkit::prelude::*;

    fn publish(store: &InMemoryStore, instance: &str, ts: u64) -> SnapshotName {
        let name = SnapshotName::new("db", instance, ts, "gen").unwrap();
        let snapshot = snapshot_with(instance, "t", vec![entry(b"k", &ts.to_be_bytes(), ts, false)]);
        store.store(&name.to_string(), &snapshot.encode().unwrap()).unwrap();
        name
    }

    fn receiver(store: Arc<InMemoryStore>, shutdown: &Shutdown, limit: usize) -> Receiver {
        let config = SyncConfig::new("db", "me")
            .with_retry(RetryConfig::new(3).with_delay(Duration::from_millis(1)));
        Receiver::new(
            store,
            &config,
            ConcurrencyLimit::new(limit),
            Arc::default(),
            shutdown.signal(),
        )
    }

    async fn wait_for(receiver: &Receiver, count: usize) -> Vec<HeldSnapshot> {
        let mut held = Vec::new();
        while held.len() < count {
            tokio::time::timeout(Duration::from_secs(5), receiver.wait_pending())
                .await
                .expect("no snapshot arrived");
            held.extend(receiver.take_pending());
        }
        held
    }

    #[tokio::test]
    async fn lists_newest_per_instance() {
        let store = Arc::new(InMemoryStore::new());
        publish(&store, "a", 1);
        let newest_a = publish(&store, "a", 2);
        let newest_b = publish(&store, "b", 1);
        publish(&store, "me", 1);
        store.store("other__x__bad", b"x").unwrap();
        store.store("README", b"x").unwrap();

        let shutdown = Shutdown::new();
        let mut receiver = receiver(store, &shutdown, 4);
        let listing = receiver.poll().await.unwrap();
        assert_eq!(
            listing,
            Listing {
                own_snapshots: 1,
                remote_instances: 2,
                new_snapshots: 2
            }
        );

        let mut names: Vec<_> = wait_for(&receiver, 2).await.into_iter().map(|h| h.name).collect();
        names.sort_by(|a, b| a.instance.cmp(&b.instance));
        assert_eq!(names, vec![newest_a, newest_b]);

        // Nothing new on the second listing.
        assert_eq!(receiver.poll().await.unwrap().new_snapshots, 0);
    }

    #[tokio::test]
    async fn undecodable_snapshot_is_ignored_for_good() {
        let store = Arc::new(InMemoryStore::new());
        let name = SnapshotName::new("db", "a", 5, "gen").unwrap();
        store.store(&name.to_string(), b"garbage").unwrap();

        let shutdown = Shutdown::new();
        let mut receiver = receiver(Arc::clone(&store), &shutdown, 4);
        receiver.poll().await.unwrap();
        for _ in 0..500 {
            if receiver.is_ignored(&name) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(receiver.is_ignored(&name));
        assert_eq!(receiver.shared.stats.lock().snapshots_ignored, 1);
        assert_eq!(receiver.poll().await.unwrap().remote_instances, 0);

        publish(&store, "a", 6);
        assert_eq!(receiver.poll().await.unwrap().new_snapshots, 1);
        assert_eq!(wait_for(&receiver, 1).await[0].name.timestamp_ns, 6);
    }

    #[tokio::test]
    async fn ignored_names_are_forgotten_once_deleted() {
        let store = Arc::new(InMemoryStore::new());
        let name = publish(&store, "a", 1);
        let shutdown = Shutdown::new();
        let mut receiver = receiver(Arc::clone(&store), &shutdown, 4);
        receiver.ignore(&name);
        receiver.poll().await.unwrap();
        assert!(receiver.is_ignored(&name));

        assert!(store.remove(&name.to_string()));
        receiver.poll().await.unwrap();
        assert!(!receiver.is_ignored(&name));
        assert!(receiver.shared.ignored.lock().is_empty());
    }

    #[tokio::test]
    async fn newer_snapshot_replaces_pending_one() {
        let store = Arc::new(InMemoryStore::new());
        publish(&store, "a", 1);
        let shutdown = Shutdown::new();
        let mut receiver = receiver(Arc::clone(&store), &shutdown, 4);
        receiver.poll().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), receiver.wait_pending())
            .await
            .unwrap();

        publish(&store, "a", 2);
        receiver.poll().await.unwrap();
        loop {
            let pending = receiver.shared.pending.lock().get("a").map(|h| h.name.timestamp_ns);
            if pending == Some(2) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let held = receiver.take_pending();
        assert_eq!(held.len(), 1);
        assert!(held[0].holds_permit());
        // The superseded snapshot gave its permit back.
        assert_eq!(receiver.shared.limit.available(), 3);
    }

    #[tokio::test]
    async fn listing_retries_transient_failures() {
        let store = Arc::new(InMemoryStore::new());
        publish(&store, "a", 1);
        store.fail_next(2);
        let shutdown = Shutdown::new();
        let mut receiver = receiver(Arc::clone(&store), &shutdown, 4);
        assert_eq!(receiver.poll().await.unwrap().remote_instances, 1);
        assert_eq!(receiver.shared.stats.lock().list_retries, 2);
        wait_for(&receiver, 1).await;

        store.fail_next(3);
        assert!(matches!(receiver.poll().await, Err(SyncError::Storage(_))));
    }
}
