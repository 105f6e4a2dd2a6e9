//! Shadow tables for schemas without sync headers.
//!
//! Every application table `t` gets a shadow table `_sync_shadow_t` holding
//! one header-tagged entry per key ever seen in `t`, tombstones included.
//! Snapshots are built from and merged into the shadow tables;
//! [`real_to_shadow`] and [`shadow_to_main`] move changes between the two.

use crate::error::SyncResult;
use tidesync_core::{TableFlags, Txn, WriteTxn};
use tidesync_merge::{read_sync_entries, PlainIterator, ShadowIterator, SinkTable, Strategy};
use tracing::debug;

/// Prefix of every table owned by the sync engine.
pub const PRIVATE_PREFIX: &str = "_sync";

/// Prefix of shadow tables.
pub const SHADOW_PREFIX: &str = "_sync_shadow_";

/// True for tables owned by the sync engine, which are never replicated
/// as application data.
pub fn is_private(table: &str) -> bool {
    table.starts_with(PRIVATE_PREFIX)
}

/// Name of the shadow table of `table`.
pub fn shadow_name(table: &str) -> String {
    format!("{SHADOW_PREFIX}{table}")
}

/// Name of the application table a shadow table mirrors.
pub fn real_name(shadow: &str) -> Option<&str> {
    shadow.strip_prefix(SHADOW_PREFIX)
}

/// Flags of the shadow table of a table with `flags`.
///
/// Duplicates are stored under unique composite keys, so shadow tables
/// never use `DUP_SORT`.
pub fn shadow_flags(flags: TableFlags) -> TableFlags {
    TableFlags::from_bits(flags.bits() & !TableFlags::DUP_SORT.bits())
}

/// Records the current content of every application table in its shadow
/// table.
///
/// New and changed keys are stamped with `timestamp`, keys gone from the
/// application table become tombstones, unchanged keys are left alone.
/// Tables in `ignore` are skipped.
///
/// # Errors
///
/// Returns a merge or database error; the caller should abort `txn`.
pub fn real_to_shadow(txn: &mut WriteTxn<'_>, timestamp: u64, ignore: &[String]) -> SyncResult<()> {
    let names = txn.table_names();
    let mut tables = Vec::new();
    for name in &names {
        if !is_private(name) && !ignore.contains(name) {
            tables.push((name.clone(), txn.table_flags(name)?, true));
        }
    }
    // A dropped application table turns its whole shadow into tombstones.
    for name in &names {
        if let Some(real) = real_name(name) {
            if !txn.has_table(real) && !ignore.iter().any(|t| t == real) {
                tables.push((real.to_string(), txn.table_flags(name)?, false));
            }
        }
    }

    for (table, flags, exists) in tables {
        let rows = if exists {
            read_sync_entries(&*txn, &table)?
        } else {
            Vec::new()
        };
        let shadow = shadow_name(&table);
        txn.create_table(&shadow, shadow_flags(flags))?;
        let txn_id = txn.id().as_u64();
        let count = rows.len();
        let mut source = ShadowIterator::new(shadow.as_str(), rows, txn_id, timestamp);
        let mut sink = SinkTable::open(txn, &shadow)?;
        Strategy::IterUpdate.apply(&mut sink, &mut source)?;
        debug!(table = %table, txn_id, entries = count, "real to shadow");
    }
    Ok(())
}

/// Writes the live content of every shadow table into its application
/// table, deleting keys whose shadow entry is a tombstone or missing.
///
/// Application tables that do not exist yet are created with the shadow
/// table's flags.
///
/// # Errors
///
/// Returns a merge or database error; the caller should abort `txn`.
pub fn shadow_to_main(txn: &mut WriteTxn<'_>, ignore: &[String]) -> SyncResult<()> {
    for name in txn.table_names() {
        let Some(real) = real_name(&name) else {
            continue;
        };
        if ignore.iter().any(|t| t == real) {
            continue;
        }
        let real = real.to_string();
        if !txn.has_table(&real) {
            let flags = txn.table_flags(&name)?;
            txn.create_table(&real, flags)?;
        }
        let rows = read_sync_entries(&*txn, &name)?;
        let count = rows.len();
        let mut source = PlainIterator::new(real.as_str(), rows);
        let mut sink = SinkTable::open(txn, &real)?;
        Strategy::IterUpdate.apply(&mut sink, &mut source)?;
        debug!(table = %real, entries = count, "shadow to main");
    }
    Ok(())
}
