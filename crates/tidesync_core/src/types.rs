//! Core type definitions.

use std::cmp::Ordering;
use std::fmt;

/// Identifier of a committed (or in-progress write) transaction.
///
/// Ids are monotonically increasing. A write transaction is assigned
/// `last committed + 1`; the committed id only advances when a write
/// transaction commits at least one modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Storage flags of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TableFlags(u32);

impl TableFlags {
    /// Plain byte-ordered table with unique keys.
    pub const NONE: Self = Self(0);
    /// Keys are 4- or 8-byte little-endian unsigned integers.
    pub const INTEGER_KEY: Self = Self(0x08);
    /// Each key holds a sorted set of values.
    pub const DUP_SORT: Self = Self(0x04);

    /// Creates flags from raw bits, dropping unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & (Self::INTEGER_KEY.0 | Self::DUP_SORT.0))
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True for integer-keyed tables.
    #[must_use]
    pub const fn is_integer_key(self) -> bool {
        self.contains(Self::INTEGER_KEY)
    }

    /// True for duplicate-sorted tables.
    #[must_use]
    pub const fn is_dup_sort(self) -> bool {
        self.contains(Self::DUP_SORT)
    }
}

impl std::ops::BitOr for TableFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Total order of keys within a table.
///
/// The same order is used by the store and by every consumer that has to
/// check that an external key sequence is sorted the way the table is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    /// Lexicographic byte comparison.
    Bytes,
    /// Numeric comparison of fixed-width little-endian unsigned integers.
    ///
    /// Decoding is always little-endian, independent of the host.
    IntegerLe,
}

impl KeyOrder {
    /// Returns the key order of a table with `flags`.
    #[must_use]
    pub const fn for_flags(flags: TableFlags) -> Self {
        if flags.is_integer_key() {
            KeyOrder::IntegerLe
        } else {
            KeyOrder::Bytes
        }
    }

    /// Returns true if `key` can be ordered: any key for
    /// [`KeyOrder::Bytes`], a 4- or 8-byte key for [`KeyOrder::IntegerLe`].
    #[must_use]
    pub fn is_valid(self, key: &[u8]) -> bool {
        match self {
            KeyOrder::Bytes => true,
            KeyOrder::IntegerLe => decode_le(key).is_some(),
        }
    }

    /// Compares two keys.
    ///
    /// Returns `None` for [`KeyOrder::IntegerLe`] if either key is not 4
    /// or 8 bytes long.
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Option<Ordering> {
        match self {
            KeyOrder::Bytes => Some(a.cmp(b)),
            KeyOrder::IntegerLe => Some(decode_le(a)?.cmp(&decode_le(b)?)),
        }
    }
}

/// Decodes a 4- or 8-byte little-endian unsigned integer.
#[must_use]
pub fn decode_le(key: &[u8]) -> Option<u64> {
    match key.len() {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(key);
            Some(u64::from(u32::from_le_bytes(b)))
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(key);
            Some(u64::from_le_bytes(b))
        }
        _ => None,
    }
}
