//! Merge-join of a sorted source against a table.

use crate::error::{MergeError, MergeResult};
use crate::iterator::SyncIterator;
use crate::sink::SinkTable;
use std::cmp::Ordering;
use tidesync_core::KeyOrder;

/// One position of a merge-join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeStep<'a> {
    /// The source key at this position, if the source has it.
    pub source_key: Option<&'a [u8]>,
    /// The table's `(key, value)` at this position, if the table has it.
    pub sink: Option<(&'a [u8], &'a [u8])>,
    /// The source has no keys left.
    pub source_eof: bool,
    /// The table has no keys left.
    pub sink_eof: bool,
}

/// Walks `source` and the table in lock-step, calling `visit` once for
/// every key in either of them, in ascending order.
///
/// The table is read with a forward cursor that is never rewound, so
/// `visit` may freely write to and delete from the table. Keys it
/// inserts are never visited.
///
/// # Errors
///
/// Returns [`MergeError::KeysNotSorted`] as soon as the source yields a
/// key that does not sort strictly after its predecessor in the table's
/// key order, and [`MergeError::InvalidKey`] for a source key the table
/// cannot hold. Writes already made are not undone; aborting the enclosing
/// transaction is the recovery.
pub fn merge_join<I, F>(sink: &mut SinkTable<'_, '_>, source: &mut I, mut visit: F) -> MergeResult<()>
where
    I: SyncIterator + ?Sized,
    F: FnMut(&mut SinkTable<'_, '_>, &mut I, MergeStep<'_>) -> MergeResult<()>,
{
    let order = sink.key_order();
    let mut cursor = sink.cursor()?;
    let mut sink_cur = sink.next_entry(&mut cursor)?;
    let mut src_key = Vec::new();
    let mut have_src = pull(sink, source, order, &mut src_key, false)?;

    loop {
        let ordering = match (&sink_cur, have_src) {
            (None, false) => break,
            (None, true) => Ordering::Less,
            (Some(_), false) => Ordering::Greater,
            (Some((k, _)), true) => order
                .compare(&src_key, k)
                .ok_or_else(|| MergeError::invalid_key(sink.name(), &src_key, "not comparable"))?,
        };
        match ordering {
            Ordering::Less => {
                let step = MergeStep {
                    source_key: Some(src_key.as_slice()),
                    sink: None,
                    source_eof: false,
                    sink_eof: sink_cur.is_none(),
                };
                visit(sink, source, step)?;
                have_src = pull(sink, source, order, &mut src_key, true)?;
            }
            Ordering::Greater => {
                if let Some((k, v)) = sink_cur.take() {
                    let step = MergeStep {
                        source_key: None,
                        sink: Some((k.as_slice(), v.as_slice())),
                        source_eof: !have_src,
                        sink_eof: false,
                    };
                    visit(sink, source, step)?;
                }
                sink_cur = sink.next_entry(&mut cursor)?;
            }
            Ordering::Equal => {
                if let Some((k, v)) = sink_cur.take() {
                    let step = MergeStep {
                        source_key: Some(src_key.as_slice()),
                        sink: Some((k.as_slice(), v.as_slice())),
                        source_eof: false,
                        sink_eof: false,
                    };
                    visit(sink, source, step)?;
                }
                sink_cur = sink.next_entry(&mut cursor)?;
                have_src = pull(sink, source, order, &mut src_key, true)?;
            }
        }
    }
    Ok(())
}

/// Reads the next source key into `buf`, checking it is a valid key of
/// the table and sorts after the previous key (still in `buf` when
/// `has_prev`).
pub(crate) fn pull<I: SyncIterator + ?Sized>(
    sink: &SinkTable<'_, '_>,
    source: &mut I,
    order: KeyOrder,
    buf: &mut Vec<u8>,
    has_prev: bool,
) -> MergeResult<bool> {
    let Some(key) = source.next()? else {
        return Ok(false);
    };
    if !order.is_valid(key) {
        return Err(MergeError::invalid_key(
            sink.name(),
            key,
            format!("integer keys must be 4 or 8 bytes wide, got {}", key.len()),
        ));
    }
    if has_prev && order.compare(key, buf) != Some(Ordering::Greater) {
        return Err(MergeError::keys_not_sorted(
            sink.name(),
            key,
            buf,
            sink.txn_id(),
        ));
    }
    buf.clear();
    buf.extend_from_slice(key);
    Ok(true)
}
