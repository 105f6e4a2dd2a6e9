//! Versioned value header.
//!
//! Every value in a header-aware table starts with a fixed 24-byte header,
//! optionally followed by 8-byte extension blocks, and then the application
//! value. The header turns a plain key-value table into a last-writer-wins
//! register per key: the timestamp orders writes and the deleted flag turns
//! an entry into a tombstone.
//!
//! All multi-byte integers are big-endian so that headers written on any
//! host are bit-identical.

use crate::error::{HeaderError, HeaderResult};

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 24;

/// The only header format version currently defined.
pub const HEADER_VERSION: u8 = 0;

/// Size of one extension block in bytes.
pub const EXTENSION_BLOCK_SIZE: usize = 8;

const OFFSET_TXN_ID: usize = 8;
const OFFSET_VERSION: usize = 16;
const OFFSET_FLAGS: usize = 17;
const OFFSET_EXT_BLOCKS: usize = 22;

/// Flags stored in byte 17 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Flags(u8);

impl Flags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The entry is a tombstone.
    pub const DELETED: Self = Self(0x01);
    /// Flags allowed to propagate between instances.
    pub const SYNC_MASK: Self = Self(0x01);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks if the deleted flag is set.
    #[must_use]
    pub const fn is_deleted(self) -> bool {
        self.0 & Self::DELETED.0 != 0
    }

    /// Returns these flags with the deleted flag set.
    #[must_use]
    pub const fn with_deleted(self) -> Self {
        Self(self.0 | Self::DELETED.0)
    }

    /// Strips every flag that must not leave this instance.
    #[must_use]
    pub const fn masked(self) -> Self {
        Self(self.0 & Self::SYNC_MASK.0)
    }
}

/// A parsed or to-be-written value header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Last modification time, nanoseconds since the Unix epoch.
    pub timestamp: u64,
    /// Id of the local write transaction that produced the value.
    pub txn_id: u64,
    /// Header format version.
    pub version: u8,
    /// Entry flags.
    pub flags: Flags,
    extension: &'a [u8],
}

impl Header<'static> {
    /// Creates a header without extension blocks.
    #[must_use]
    pub const fn new(timestamp: u64, txn_id: u64, flags: Flags) -> Self {
        Self {
            timestamp,
            txn_id,
            version: HEADER_VERSION,
            flags,
            extension: &[],
        }
    }
}

impl<'a> Header<'a> {
    /// Attaches extension data, which must be whole 8-byte blocks.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::InvalidExtension`] if the length is not a
    /// multiple of 8 or exceeds `u16::MAX` blocks.
    pub fn with_extension<'b>(self, extension: &'b [u8]) -> HeaderResult<Header<'b>> {
        let blocks = extension.len() / EXTENSION_BLOCK_SIZE;
        if extension.len() % EXTENSION_BLOCK_SIZE != 0 || blocks > usize::from(u16::MAX) {
            return Err(HeaderError::InvalidExtension(extension.len()));
        }
        Ok(Header {
            timestamp: self.timestamp,
            txn_id: self.txn_id,
            version: self.version,
            flags: self.flags,
            extension,
        })
    }

    /// Returns the extension bytes (possibly empty).
    #[must_use]
    pub fn extension(&self) -> &'a [u8] {
        self.extension
    }

    /// Returns true if the entry is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags.is_deleted()
    }

    /// Total encoded size including extension blocks.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.extension.len()
    }

    /// Appends the encoded header to `buf`.
    pub fn write_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.txn_id.to_be_bytes());
        buf.push(self.version);
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&[0u8; 4]);
        let blocks = (self.extension.len() / EXTENSION_BLOCK_SIZE) as u16;
        buf.extend_from_slice(&blocks.to_be_bytes());
        buf.extend_from_slice(self.extension);
    }

    /// Encodes the header into a new buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_into(&mut buf);
        buf
    }
}

/// Parses the header at the start of `data`.
///
/// Returns the header and the application value that follows it.
///
/// # Errors
///
/// - [`HeaderError::TooShort`] if `data` is shorter than 24 bytes or the
///   declared extension blocks overrun it
/// - [`HeaderError::UnsupportedVersion`] if the version byte is not 0
pub fn parse(data: &[u8]) -> HeaderResult<(Header<'_>, &[u8])> {
    if data.len() < HEADER_SIZE {
        return Err(HeaderError::TooShort {
            len: data.len(),
            needed: HEADER_SIZE,
        });
    }
    let version = data[OFFSET_VERSION];
    if version != HEADER_VERSION {
        return Err(HeaderError::UnsupportedVersion(version));
    }

    let blocks = u16::from_be_bytes([data[OFFSET_EXT_BLOCKS], data[OFFSET_EXT_BLOCKS + 1]]);
    let end = HEADER_SIZE + usize::from(blocks) * EXTENSION_BLOCK_SIZE;
    if data.len() < end {
        return Err(HeaderError::TooShort {
            len: data.len(),
            needed: end,
        });
    }

    let header = Header {
        timestamp: read_u64(data, 0),
        txn_id: read_u64(data, OFFSET_TXN_ID),
        version,
        flags: Flags::from_byte(data[OFFSET_FLAGS]),
        extension: &data[HEADER_SIZE..end],
    };
    Ok((header, &data[end..]))
}

/// Returns the application value after the header.
///
/// # Errors
///
/// Same as [`parse`].
pub fn skip(data: &[u8]) -> HeaderResult<&[u8]> {
    parse(data).map(|(_, rest)| rest)
}

/// Appends a header without extensions to `buf`.
pub fn write_basic(buf: &mut Vec<u8>, timestamp: u64, txn_id: u64, flags: Flags) {
    Header::new(timestamp, txn_id, flags).write_into(buf);
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn layout_is_big_endian() {
        let encoded = Header::new(0x0102_0304_0506_0708, 0x1112_1314_1516_1718, Flags::DELETED)
            .encode();
        assert_eq!(
            encoded,
            vec![
                1, 2, 3, 4, 5, 6, 7, 8, // timestamp
                0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, // txn id
                0, 1, // version, flags
                0, 0, 0, 0, // reserved
                0, 0, // extension blocks
            ]
        );
    }

    #[test]
    fn parse_too_short() {
        let err = parse(&[0u8; 23]).unwrap_err();
        assert_eq!(err, HeaderError::TooShort { len: 23, needed: 24 });
    }

    #[test]
    fn parse_unsupported_version() {
        let mut data = Header::new(1, 1, Flags::NONE).encode();
        data[16] = 1;
        assert_eq!(parse(&data).unwrap_err(), HeaderError::UnsupportedVersion(1));
    }

    #[test]
    fn parse_extension_overrun() {
        let mut data = Header::new(1, 1, Flags::NONE).encode();
        data[23] = 2;
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(
            parse(&data).unwrap_err(),
            HeaderError::TooShort { len: 32, needed: 40 }
        );
    }

    #[test]
    fn extension_blocks_precede_value() {
        let ext = [7u8; 16];
        let header = Header::new(5, 6, Flags::NONE).with_extension(&ext).unwrap();
        let mut data = header.encode();
        data.extend_from_slice(b"value");

        let (parsed, rest) = parse(&data).unwrap();
        assert_eq!(parsed.extension(), &ext);
        assert_eq!(rest, b"value");
        assert_eq!(data[23], 2);
    }

    #[test]
    fn extension_must_be_whole_blocks() {
        let ext = [0u8; 9];
        assert_eq!(
            Header::new(0, 0, Flags::NONE).with_extension(&ext).unwrap_err(),
            HeaderError::InvalidExtension(9)
        );
    }

    #[test]
    fn reserved_bytes_are_ignored_on_parse() {
        let mut data = Header::new(9, 9, Flags::NONE).encode();
        data[19] = 0xAA;
        let (parsed, _) = parse(&data).unwrap();
        assert_eq!(parsed.timestamp, 9);
        assert_eq!(&parsed.encode()[18..22], &[0, 0, 0, 0]);
    }

    #[test]
    fn masked_strips_unknown_flags() {
        let flags = Flags::from_byte(0b1000_0011);
        assert_eq!(flags.masked(), Flags::DELETED);
        assert_eq!(Flags::from_byte(0x80).masked(), Flags::NONE);
    }

    proptest! {
        #[test]
        fn header_roundtrip(ts in any::<u64>(), txn in any::<u64>(), deleted in any::<bool>(),
                            payload in prop::collection::vec(any::<u8>(), 0..64)) {
            let flags = if deleted { Flags::DELETED } else { Flags::NONE };
            let header = Header::new(ts, txn, flags);
            let mut data = header.encode();
            prop_assert_eq!(parse(&data).unwrap().0, header);

            data.extend_from_slice(&payload);
            prop_assert_eq!(skip(&data).unwrap(), &payload[..]);
        }
    }
}
