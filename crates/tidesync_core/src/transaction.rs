//! Read and write transactions.

use crate::cursor::Cursor;
use crate::dupkey;
use crate::env::{EnvInner, EnvState};
use crate::error::{CoreError, CoreResult};
use crate::table::TableData;
use crate::types::{KeyOrder, TableFlags, TxnId};
use parking_lot::MutexGuard;
use std::ops::Bound;
use std::sync::Arc;

/// A borrowed view of the state a transaction operates on.
///
/// Obtained through [`Txn::snapshot`]; its contents are only reachable
/// through the [`Txn`] methods and [`Cursor`].
pub struct StateRef<'a> {
    state: &'a EnvState,
    id: TxnId,
}

impl<'a> StateRef<'a> {
    pub(crate) fn table(&self, name: &str) -> CoreResult<&'a TableData> {
        self.state
            .tables
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| CoreError::table_not_found(name))
    }
}

/// Operations shared by read and write transactions.
pub trait Txn {
    /// Returns the state visible to this transaction.
    fn snapshot(&self) -> StateRef<'_>;

    /// Transaction id.
    ///
    /// For a read transaction this is the committed id it observes; for a
    /// write transaction it is the id the transaction commits under.
    fn id(&self) -> TxnId {
        self.snapshot().id
    }

    /// Names of all tables in name order.
    fn table_names(&self) -> Vec<String> {
        self.snapshot().state.tables.keys().cloned().collect()
    }

    /// Checks whether a table exists.
    fn has_table(&self, name: &str) -> bool {
        self.snapshot().state.tables.contains_key(name)
    }

    /// Storage flags of a table.
    fn table_flags(&self, name: &str) -> CoreResult<TableFlags> {
        Ok(self.snapshot().table(name)?.flags)
    }

    /// Key order of a table.
    fn key_order(&self, name: &str) -> CoreResult<KeyOrder> {
        self.table_flags(name).map(KeyOrder::for_flags)
    }

    /// Number of entries in a table, duplicates counted individually.
    fn len(&self, name: &str) -> CoreResult<usize> {
        Ok(self.snapshot().table(name)?.len())
    }

    /// Checks whether a table has no entries.
    fn is_empty(&self, name: &str) -> CoreResult<bool> {
        self.len(name).map(|n| n == 0)
    }

    /// Returns the value of `key`, or its first duplicate in a
    /// duplicate-sorted table.
    fn get(&self, table: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let snapshot = self.snapshot();
        let data = snapshot.table(table)?;
        if data.flags.is_dup_sort() {
            let prefix = dupkey::encode_prefix(key);
            return Ok(data
                .seek(Bound::Included(prefix.as_slice()))
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| data.user_entry(k, v).1));
        }
        // A key that cannot exist in an integer-keyed table is simply absent.
        let Ok(internal) = data.internal_key(table, key) else {
            return Ok(None);
        };
        Ok(data.get_internal(&internal).cloned())
    }

    /// Opens a forward cursor on a table.
    fn cursor(&self, table: &str) -> CoreResult<Cursor> {
        self.snapshot().table(table)?;
        Ok(Cursor::new(table))
    }
}

/// A read-only transaction on an immutable committed state.
pub struct ReadTxn {
    state: Arc<EnvState>,
}

impl ReadTxn {
    pub(crate) fn new(state: Arc<EnvState>) -> Self {
        Self { state }
    }
}

impl Txn for ReadTxn {
    fn snapshot(&self) -> StateRef<'_> {
        StateRef {
            state: &self.state,
            id: self.state.txn_id,
        }
    }
}

impl std::fmt::Debug for ReadTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTxn").field("id", &self.state.txn_id).finish()
    }
}

/// The single write transaction of an environment.
///
/// Holds the environment's write lock for its whole lifetime. Changes are
/// made to a private copy of the modified tables and published atomically
/// by [`WriteTxn::commit`]. Dropping the transaction discards them.
pub struct WriteTxn<'env> {
    env: &'env EnvInner,
    _guard: MutexGuard<'env, ()>,
    state: EnvState,
    id: TxnId,
    dirty: bool,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn new(env: &'env EnvInner, guard: MutexGuard<'env, ()>, base: &EnvState) -> Self {
        Self {
            env,
            _guard: guard,
            state: base.clone(),
            id: base.txn_id.next(),
            dirty: false,
        }
    }

    /// True once the transaction has modified anything.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Creates a table, or does nothing if it exists with the same flags.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TableFlagsMismatch`] if it exists with other flags
    /// - [`CoreError::TooManyTables`] if the table limit is reached
    /// - [`CoreError::InvalidOperation`] for an empty name or for
    ///   `INTEGER_KEY | DUP_SORT`
    pub fn create_table(&mut self, name: &str, flags: TableFlags) -> CoreResult<()> {
        if let Some(existing) = self.state.tables.get(name) {
            if existing.flags == flags {
                return Ok(());
            }
            return Err(CoreError::TableFlagsMismatch {
                name: name.to_string(),
                existing: existing.flags.bits(),
                requested: flags.bits(),
            });
        }
        if name.is_empty() {
            return Err(CoreError::invalid_operation("table name must not be empty"));
        }
        if flags.is_integer_key() && flags.is_dup_sort() {
            return Err(CoreError::invalid_operation(format!(
                "table {name}: INTEGER_KEY cannot be combined with DUP_SORT"
            )));
        }
        if self.state.tables.len() >= self.env.config.max_tables {
            return Err(CoreError::TooManyTables {
                limit: self.env.config.max_tables,
            });
        }
        self.state
            .tables
            .insert(name.to_string(), Arc::new(TableData::new(flags)));
        self.dirty = true;
        Ok(())
    }

    /// Removes a table and all its entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] if the table does not exist.
    pub fn drop_table(&mut self, name: &str) -> CoreResult<()> {
        let data = self
            .state
            .tables
            .remove(name)
            .ok_or_else(|| CoreError::table_not_found(name))?;
        self.state.used_bytes -= data.bytes();
        self.dirty = true;
        Ok(())
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// In a duplicate-sorted table this adds `value` to the key's set.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BadValSize`] for an empty or oversized key (or an
    ///   oversized duplicate value)
    /// - [`CoreError::InvalidIntegerKey`] for a malformed integer key
    /// - [`CoreError::MapFull`] if the environment would exceed its map size
    pub fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.write(table, key, value, false)
    }

    /// Stores an entry that must sort after every existing entry.
    ///
    /// # Errors
    ///
    /// Same as [`WriteTxn::put`], plus [`CoreError::NotAppendable`] if the
    /// entry does not sort after the table's last entry.
    pub fn append(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.write(table, key, value, true)
    }

    fn write(&mut self, table: &str, key: &[u8], value: &[u8], append: bool) -> CoreResult<()> {
        let max = self.env.config.max_key_size;
        let (internal, stored, growth) = {
            let data = self.table(table)?;
            if key.is_empty() || key.len() > max {
                return Err(CoreError::BadValSize {
                    table: table.to_string(),
                    size: key.len(),
                    max,
                });
            }
            if data.flags.is_dup_sort() && value.len() > max {
                return Err(CoreError::BadValSize {
                    table: table.to_string(),
                    size: value.len(),
                    max,
                });
            }
            let (internal, stored) = data.encode_entry(table, key, value)?;
            if append {
                if let Some(last) = data.last_internal() {
                    if internal <= *last {
                        return Err(CoreError::not_appendable(table, key));
                    }
                }
            }
            let growth = data.growth(&internal, &stored);
            (internal, stored, growth)
        };

        if growth > 0 {
            let needed = growth as usize;
            let map_size = self.env.config.map_size;
            if self.state.used_bytes + needed > map_size {
                return Err(CoreError::MapFull {
                    used: self.state.used_bytes,
                    needed,
                    map_size,
                });
            }
        }

        let delta = self.table_mut(table)?.insert(key.len(), internal, stored);
        self.state.used_bytes = (self.state.used_bytes as isize + delta) as usize;
        self.dirty = true;
        Ok(())
    }

    /// Deletes `key` (every duplicate of it in a duplicate-sorted table).
    ///
    /// Returns whether anything was removed. Open cursors are unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotFound`] if the table does not exist.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> CoreResult<bool> {
        let targets = {
            let data = self.table(table)?;
            if data.flags.is_dup_sort() {
                data.keys_with_prefix(&dupkey::encode_prefix(key))
            } else {
                match data.internal_key(table, key) {
                    Ok(internal) if data.get_internal(&internal).is_some() => vec![internal],
                    _ => Vec::new(),
                }
            }
        };
        self.remove_internal(table, &targets)
    }

    /// Deletes one duplicate of `key` in a duplicate-sorted table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the table is not
    /// duplicate-sorted.
    pub fn delete_dup(&mut self, table: &str, key: &[u8], value: &[u8]) -> CoreResult<bool> {
        let composite = {
            let data = self.table(table)?;
            if !data.flags.is_dup_sort() {
                return Err(CoreError::invalid_operation(format!(
                    "table {table} is not duplicate-sorted"
                )));
            }
            dupkey::encode(key, value)
        };
        if self.table(table)?.get_internal(&composite).is_none() {
            return Ok(false);
        }
        self.remove_internal(table, &[composite])
    }

    fn remove_internal(&mut self, table: &str, targets: &[Vec<u8>]) -> CoreResult<bool> {
        if targets.is_empty() {
            return Ok(false);
        }
        let data = self.table_mut(table)?;
        let freed: usize = targets.iter().filter_map(|k| data.remove(k)).sum();
        self.state.used_bytes -= freed;
        self.dirty = true;
        Ok(true)
    }

    /// Publishes the transaction's changes.
    ///
    /// Returns the environment's committed id afterwards: this
    /// transaction's id if it modified anything, otherwise the unchanged
    /// previous id.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for durable backends.
    pub fn commit(self) -> CoreResult<TxnId> {
        if !self.dirty {
            tracing::trace!(txn_id = %self.id, "commit without changes");
            return Ok(self.state.txn_id);
        }
        let mut state = self.state;
        state.txn_id = self.id;
        let used_bytes = state.used_bytes;
        *self.env.committed.write() = Arc::new(state);
        tracing::debug!(txn_id = %self.id, used_bytes, "committed");
        Ok(self.id)
    }

    /// Discards the transaction's changes.
    pub fn abort(self) {
        if self.dirty {
            tracing::debug!(txn_id = %self.id, "aborted");
        }
    }

    fn table(&self, name: &str) -> CoreResult<&TableData> {
        self.state
            .tables
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| CoreError::table_not_found(name))
    }

    fn table_mut(&mut self, name: &str) -> CoreResult<&mut TableData> {
        self.state
            .tables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::table_not_found(name))
    }
}

impl Txn for WriteTxn<'_> {
    fn snapshot(&self) -> StateRef<'_> {
        StateRef {
            state: &self.state,
            id: self.id,
        }
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{CoreError, Env, EnvConfig, TableFlags, Txn, TxnId};

    fn env() -> Env {
        Env::open(EnvConfig::default())
    }

    #[test]
    fn empty_commit_does_not_advance_id() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        assert_eq!(txn.id(), TxnId::new(1));
        assert_eq!(txn.commit().unwrap(), TxnId::new(1));

        let txn = env.begin_write();
        assert_eq!(txn.id(), TxnId::new(2));
        assert_eq!(txn.commit().unwrap(), TxnId::new(1));
        assert_eq!(env.last_txn_id(), TxnId::new(1));
        assert_eq!(env.begin_write().id(), TxnId::new(2));
    }

    #[test]
    fn readers_are_isolated() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        txn.put("t", b"k", b"v1").unwrap();
        txn.commit().unwrap();

        let before = env.begin_read();
        let mut txn = env.begin_write();
        txn.put("t", b"k", b"v2").unwrap();
        assert_eq!(env.begin_read().get("t", b"k").unwrap(), Some(b"v1".to_vec()));
        txn.commit().unwrap();

        assert_eq!(before.get("t", b"k").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(env.begin_read().get("t", b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn dropped_write_aborts() {
        let env = env();
        {
            let mut txn = env.begin_write();
            txn.create_table("t", TableFlags::NONE).unwrap();
        }
        assert!(!env.begin_read().has_table("t"));
        assert_eq!(env.last_txn_id(), TxnId::new(0));
    }

    #[test]
    fn create_table_flag_rules() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::DUP_SORT).unwrap();
        txn.create_table("t", TableFlags::DUP_SORT).unwrap();
        assert!(matches!(
            txn.create_table("t", TableFlags::NONE),
            Err(CoreError::TableFlagsMismatch { .. })
        ));
        assert!(matches!(
            txn.create_table("x", TableFlags::DUP_SORT | TableFlags::INTEGER_KEY),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn too_many_tables() {
        let env = Env::open(EnvConfig::new().max_tables(1));
        let mut txn = env.begin_write();
        txn.create_table("a", TableFlags::NONE).unwrap();
        assert!(matches!(
            txn.create_table("b", TableFlags::NONE),
            Err(CoreError::TooManyTables { limit: 1 })
        ));
    }

    #[test]
    fn key_size_limits() {
        let env = Env::open(EnvConfig::new().max_key_size(4));
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        assert!(matches!(
            txn.put("t", b"", b"v"),
            Err(CoreError::BadValSize { size: 0, .. })
        ));
        assert!(matches!(
            txn.put("t", b"toolong", b"v"),
            Err(CoreError::BadValSize { size: 7, max: 4, .. })
        ));
        txn.put("t", b"ok", b"a value longer than the key limit").unwrap();
    }

    #[test]
    fn map_full() {
        let env = Env::open(EnvConfig::new().map_size(10));
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        txn.put("t", b"k", b"12345").unwrap();
        assert!(matches!(
            txn.put("t", b"k2", b"123456"),
            Err(CoreError::MapFull { used: 6, .. })
        ));
        // Overwriting with a value of the same size needs no extra space.
        txn.put("t", b"k", b"abcde").unwrap();
        txn.delete("t", b"k").unwrap();
        txn.put("t", b"k2", b"1234567").unwrap();
        assert_eq!(env.info().used_bytes, 0);
        txn.commit().unwrap();
        assert_eq!(env.info().used_bytes, 9);
    }

    #[test]
    fn append_requires_increasing_keys() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        txn.append("t", b"aaa", b"1").unwrap();
        txn.append("t", b"bbbb", b"2").unwrap();
        assert!(matches!(
            txn.append("t", b"b", b"3"),
            Err(CoreError::NotAppendable { .. })
        ));
        assert!(matches!(
            txn.append("t", b"bbbb", b"3"),
            Err(CoreError::NotAppendable { .. })
        ));
        assert_eq!(txn.len("t").unwrap(), 2);
    }

    #[test]
    fn integer_keys_order_numerically() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("n", TableFlags::INTEGER_KEY).unwrap();
        txn.append("n", &1u32.to_le_bytes(), b"one").unwrap();
        txn.append("n", &256u32.to_le_bytes(), b"big").unwrap();
        assert!(matches!(
            txn.append("n", &2u32.to_le_bytes(), b"two"),
            Err(CoreError::NotAppendable { .. })
        ));
        assert!(matches!(
            txn.put("n", &3u64.to_le_bytes(), b"wide"),
            Err(CoreError::InvalidIntegerKey { expected: 4, .. })
        ));
        assert!(matches!(
            txn.put("n", b"abc", b"x"),
            Err(CoreError::InvalidIntegerKey { .. })
        ));
        assert_eq!(
            txn.get("n", &256u32.to_le_bytes()).unwrap(),
            Some(b"big".to_vec())
        );
    }

    #[test]
    fn dup_sort_put_and_delete() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("d", TableFlags::DUP_SORT).unwrap();
        txn.put("d", b"k", b"b").unwrap();
        txn.put("d", b"k", b"a").unwrap();
        txn.put("d", b"k", b"a").unwrap();
        txn.put("d", b"k2", b"z").unwrap();
        assert_eq!(txn.len("d").unwrap(), 3);
        assert_eq!(txn.get("d", b"k").unwrap(), Some(b"a".to_vec()));

        assert!(txn.delete_dup("d", b"k", b"a").unwrap());
        assert!(!txn.delete_dup("d", b"k", b"a").unwrap());
        assert_eq!(txn.get("d", b"k").unwrap(), Some(b"b".to_vec()));

        assert!(txn.delete("d", b"k").unwrap());
        assert_eq!(txn.get("d", b"k").unwrap(), None);
        assert_eq!(txn.len("d").unwrap(), 1);
    }

    #[test]
    fn drop_table_frees_space() {
        let env = env();
        let mut txn = env.begin_write();
        txn.create_table("t", TableFlags::NONE).unwrap();
        txn.put("t", b"k", b"v").unwrap();
        txn.drop_table("t").unwrap();
        assert!(matches!(
            txn.drop_table("t"),
            Err(CoreError::TableNotFound { .. })
        ));
        txn.commit().unwrap();
        assert_eq!(env.info().used_bytes, 0);
        assert_eq!(env.info().table_count, 0);
    }
}
