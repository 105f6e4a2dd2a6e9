//! Order-preserving encoding of `(key, value)` pairs into one byte string.
//!
//! Duplicate-sorted tables store each `(key, value)` pair under a single
//! composite key. The encoding escapes `0x00` in the key as `0x00 0xFF` and
//! terminates the key with `0x00 0x01`, followed by the raw value, so that
//! byte order of composites equals `(key, value)` order.

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

/// Encodes the key part of a composite, including its terminator.
///
/// Every composite for `key` starts with this prefix.
#[must_use]
pub fn encode_prefix(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 2);
    for &b in key {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
    out
}

/// Encodes a `(key, value)` pair.
#[must_use]
pub fn encode(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = encode_prefix(key);
    out.extend_from_slice(value);
    out
}

/// Splits a composite back into key and value.
///
/// Returns `None` if the key terminator is missing or an escape is invalid.
#[must_use]
pub fn decode(composite: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut key = Vec::new();
    let mut i = 0;
    while i < composite.len() {
        let b = composite[i];
        if b != ESCAPE {
            key.push(b);
            i += 1;
            continue;
        }
        match composite.get(i + 1) {
            Some(&ESCAPED_ZERO) => {
                key.push(ESCAPE);
                i += 2;
            }
            Some(&TERMINATOR) => return Some((key, &composite[i + 2..])),
            _ => return None,
        }
    }
    None
}
