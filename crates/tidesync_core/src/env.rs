//! The environment: a set of named tables sharing one transaction history.

use crate::config::EnvConfig;
use crate::table::TableData;
use crate::transaction::{ReadTxn, WriteTxn};
use crate::types::TxnId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Committed state visible to readers.
///
/// Tables are individually reference counted so that a write transaction
/// only copies the tables it modifies.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvState {
    pub(crate) txn_id: TxnId,
    pub(crate) tables: BTreeMap<String, Arc<TableData>>,
    pub(crate) used_bytes: usize,
}

pub(crate) struct EnvInner {
    pub(crate) config: EnvConfig,
    pub(crate) committed: RwLock<Arc<EnvState>>,
    pub(crate) write_lock: Mutex<()>,
}

/// Summary of the environment's committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    /// Id of the last transaction that committed changes.
    pub last_txn_id: TxnId,
    /// Number of tables.
    pub table_count: usize,
    /// Bytes of keys plus values in use.
    pub used_bytes: usize,
    /// Configured capacity.
    pub map_size: usize,
}

/// An embedded sorted key-value environment.
///
/// Provides:
/// - Single-writer concurrency via [`Env::begin_write`], which blocks while
///   another write transaction is open
/// - Snapshot isolation for readers via [`Env::begin_read`]
/// - Copy-on-write publication of committed state
///
/// Cloning an `Env` is cheap and yields another handle to the same store.
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

impl Env {
    /// Opens an empty environment.
    #[must_use]
    pub fn open(config: EnvConfig) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                config,
                committed: RwLock::new(Arc::new(EnvState::default())),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.inner.config
    }

    /// Begins a read-only transaction on the last committed state.
    #[must_use]
    pub fn begin_read(&self) -> ReadTxn {
        ReadTxn::new(Arc::clone(&self.inner.committed.read()))
    }

    /// Begins a write transaction, waiting for the write lock.
    ///
    /// The lock is released when the transaction is committed, aborted or
    /// dropped.
    #[must_use]
    pub fn begin_write(&self) -> WriteTxn<'_> {
        let guard = self.inner.write_lock.lock();
        let base = Arc::clone(&self.inner.committed.read());
        WriteTxn::new(&self.inner, guard, &base)
    }

    /// Returns a summary of the committed state.
    #[must_use]
    pub fn info(&self) -> EnvInfo {
        let state = self.inner.committed.read();
        EnvInfo {
            last_txn_id: state.txn_id,
            table_count: state.tables.len(),
            used_bytes: state.used_bytes,
            map_size: self.inner.config.map_size,
        }
    }

    /// Id of the last transaction that committed changes.
    #[must_use]
    pub fn last_txn_id(&self) -> TxnId {
        self.inner.committed.read().txn_id
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").field("info", &self.info()).finish()
    }
}
