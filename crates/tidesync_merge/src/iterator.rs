//! The conflict iterator contract.

use crate::error::MergeResult;

/// A sorted source of entries together with its conflict policy.
///
/// Strategies call [`SyncIterator::next`] once per source key and then,
/// for that key, at most one of [`SyncIterator::merge`] or
/// [`SyncIterator::clean`]. `clean` is also called for table keys the
/// source does not contain, in which case it refers to no source entry.
///
/// A returned `None` means "delete this key". So does an empty slice,
/// since stored values are never empty. Returned slices may point into a
/// buffer owned by the iterator and are only valid until the next call.
pub trait SyncIterator {
    /// Advances to the next source key.
    ///
    /// Keys must be strictly increasing in the target table's key order.
    fn next(&mut self) -> MergeResult<Option<&[u8]>>;

    /// Computes the value to store for the current key.
    ///
    /// `old` is the value currently stored under the key, if any. Returning
    /// `old` itself means "keep what is there".
    fn merge<'a>(&'a mut self, old: Option<&'a [u8]>) -> MergeResult<Option<&'a [u8]>>;

    /// Computes the value to keep for a key the source does not contain.
    fn clean<'a>(&'a mut self, old: &'a [u8]) -> MergeResult<Option<&'a [u8]>>;
}

/// Treats an empty merge result like an explicit delete.
pub(crate) fn non_empty(value: Option<&[u8]>) -> Option<&[u8]> {
    value.filter(|v| !v.is_empty())
}
