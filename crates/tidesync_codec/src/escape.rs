//! Printable rendering of binary keys for logs and error messages.

/// Renders a binary key with non-printable bytes escaped (`\x00`, `\n`, ...).
///
/// Keys longer than 128 bytes are truncated with a trailing `...`.
#[must_use]
pub fn escape_key(key: &[u8]) -> String {
    const LIMIT: usize = 128;
    let shown = &key[..key.len().min(LIMIT)];
    let mut out: String = shown
        .iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect();
    if key.len() > LIMIT {
        out.push_str("...");
    }
    out
}
