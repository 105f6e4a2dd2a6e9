//! Write strategies.

use crate::error::{MergeError, MergeResult};
use crate::iterator::{non_empty, SyncIterator};
use crate::join::{merge_join, pull};
use crate::sink::SinkTable;

/// An algorithm for writing a source sequence into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Bulk append into an empty table. The source must be sorted.
    Append,
    /// Put or delete every source key. No ordering requirement, and keys
    /// missing from the source are left alone.
    Put,
    /// Merge-join that deletes table keys missing from the source and
    /// rewrites matching keys only when the value changes.
    IterPut,
    /// Header-aware merge-join that only touches source keys: matching
    /// keys go through [`SyncIterator::merge`] with the stored value and
    /// table keys missing from the source are left alone.
    ///
    /// Used to apply a remote snapshot, where a missing key carries no
    /// information.
    Update,
    /// Header-aware merge-join: table keys missing from the source go
    /// through [`SyncIterator::clean`], matching keys through
    /// [`SyncIterator::merge`] with the stored value.
    IterUpdate,
}

impl Strategy {
    /// Picks the strategy for a plain load: `Append` into an empty table,
    /// `IterPut` otherwise.
    #[must_use]
    pub const fn select(table_is_empty: bool) -> Self {
        if table_is_empty {
            Self::Append
        } else {
            Self::IterPut
        }
    }

    /// Writes `source` into the table.
    ///
    /// # Errors
    ///
    /// - [`MergeError::KeysNotSorted`] if an order-dependent strategy sees
    ///   an unsorted source
    /// - [`MergeError::TableNotEmpty`] for `Append` into a non-empty table
    /// - any error of the iterator or the store
    pub fn apply<I: SyncIterator + ?Sized>(
        self,
        sink: &mut SinkTable<'_, '_>,
        source: &mut I,
    ) -> MergeResult<()> {
        tracing::trace!(table = sink.name(), strategy = ?self, txn_id = %sink.txn_id(), "apply");
        match self {
            Self::Append => append(sink, source),
            Self::Put => put(sink, source),
            Self::IterPut => iter_put(sink, source),
            Self::Update => update(sink, source),
            Self::IterUpdate => iter_update(sink, source),
        }
    }
}

fn append<I: SyncIterator + ?Sized>(sink: &mut SinkTable<'_, '_>, source: &mut I) -> MergeResult<()> {
    if !sink.is_empty()? {
        return Err(MergeError::TableNotEmpty {
            table: sink.name().to_string(),
        });
    }
    let order = sink.key_order();
    let mut key = Vec::new();
    let mut has_prev = false;
    while pull(sink, source, order, &mut key, has_prev)? {
        has_prev = true;
        if let Some(value) = non_empty(source.merge(None)?) {
            sink.append(&key, value)?;
        }
    }
    Ok(())
}

fn put<I: SyncIterator + ?Sized>(sink: &mut SinkTable<'_, '_>, source: &mut I) -> MergeResult<()> {
    let mut key = Vec::new();
    loop {
        match source.next()? {
            Some(k) => {
                key.clear();
                key.extend_from_slice(k);
            }
            None => return Ok(()),
        }
        match non_empty(source.merge(None)?) {
            Some(value) => sink.put(&key, value)?,
            None => sink.delete(&key)?,
        }
    }
}

fn iter_put<I: SyncIterator + ?Sized>(sink: &mut SinkTable<'_, '_>, source: &mut I) -> MergeResult<()> {
    merge_join(sink, source, |sink, source, step| {
        match (step.source_key, step.sink) {
            (None, Some((key, _))) => sink.delete(key),
            (Some(key), None) => match non_empty(source.merge(None)?) {
                Some(value) if step.sink_eof => sink.append(key, value),
                Some(value) => sink.put(key, value),
                None => Ok(()),
            },
            (Some(key), Some((_, old))) => match non_empty(source.merge(None)?) {
                Some(value) if value != old => sink.put(key, value),
                Some(_) => Ok(()),
                None => sink.delete(key),
            },
            (None, None) => Ok(()),
        }
    })
}

fn update<I: SyncIterator + ?Sized>(sink: &mut SinkTable<'_, '_>, source: &mut I) -> MergeResult<()> {
    merge_join(sink, source, |sink, source, step| {
        match (step.source_key, step.sink) {
            (Some(key), None) => match non_empty(source.merge(None)?) {
                Some(value) if step.sink_eof => sink.append(key, value),
                Some(value) => sink.put(key, value),
                None => Ok(()),
            },
            (Some(key), Some((_, old))) => match non_empty(source.merge(Some(old))?) {
                Some(value) if value != old => sink.put(key, value),
                Some(_) => Ok(()),
                None => sink.delete(key),
            },
            _ => Ok(()),
        }
    })
}

fn iter_update<I: SyncIterator + ?Sized>(
    sink: &mut SinkTable<'_, '_>,
    source: &mut I,
) -> MergeResult<()> {
    merge_join(sink, source, |sink, source, step| {
        match (step.source_key, step.sink) {
            (None, Some((key, old))) => match non_empty(source.clean(old)?) {
                Some(value) if value != old => sink.put(key, value),
                Some(_) => Ok(()),
                None => sink.delete(key),
            },
            (Some(key), None) => match non_empty(source.merge(None)?) {
                Some(value) if step.sink_eof => sink.append(key, value),
                Some(value) => sink.put(key, value),
                None => Ok(()),
            },
            (Some(key), Some((_, old))) => match non_empty(source.merge(Some(old))?) {
                Some(value) if value != old => sink.put(key, value),
                Some(_) => Ok(()),
                None => sink.delete(key),
            },
            (None, None) => Ok(()),
        }
    })
}
