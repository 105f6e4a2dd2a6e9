//! Snapshot blob names.
//!
//! ```text
//! <database>__<instance>__<YYYYMMDD-HHMMSS.nnnnnnnnn>__<generation>.<ext>
//! ```
//!
//! The fixed-width UTC timestamp makes lexicographic order equal to time
//! order for the snapshots of one instance.

use crate::error::NameError;
use std::fmt;
use std::str::FromStr;

/// Separator between name components.
pub const SEPARATOR: &str = "__";

/// Default file extension of snapshot blobs.
pub const DEFAULT_EXTENSION: &str = "cbor";

const NANOS_PER_SEC: u64 = 1_000_000_000;
const SECS_PER_DAY: u64 = 86_400;
const TIMESTAMP_LEN: usize = 25;

/// The parsed name of a snapshot blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    /// Database (table set) name.
    pub database: String,
    /// Producing instance.
    pub instance: String,
    /// Snapshot time in nanoseconds since the epoch.
    pub timestamp_ns: u64,
    /// Process generation of the producer.
    pub generation: String,
    /// File extension without the dot.
    pub extension: String,
}

impl SnapshotName {
    /// Creates a name with the default extension.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::InvalidComponent`] if a component is empty or
    /// contains the `__` separator (or a `.` in the generation).
    pub fn new(
        database: impl Into<String>,
        instance: impl Into<String>,
        timestamp_ns: u64,
        generation: impl Into<String>,
    ) -> Result<Self, NameError> {
        let name = Self {
            database: database.into(),
            instance: instance.into(),
            timestamp_ns,
            generation: generation.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        };
        for part in [&name.database, &name.instance, &name.generation] {
            if part.is_empty() || part.contains(SEPARATOR) {
                return Err(NameError::InvalidComponent(part.clone()));
            }
        }
        if name.generation.contains('.') {
            return Err(NameError::InvalidComponent(name.generation));
        }
        Ok(name)
    }

    /// Prefix shared by every snapshot of `database`.
    #[must_use]
    pub fn database_prefix(database: &str) -> String {
        format!("{database}{SEPARATOR}")
    }

    /// Parses a blob name.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] if the name has too few parts, no extension,
    /// or an unparseable timestamp.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        if parts.len() < 4 {
            return Err(NameError::TooFewParts(name.to_string()));
        }
        // The database name is everything before the last three parts.
        let n = parts.len();
        let database = parts[..n - 3].join(SEPARATOR);
        let instance = parts[n - 3];
        let timestamp = parts[n - 2];
        let (generation, extension) = parts[n - 1]
            .split_once('.')
            .ok_or_else(|| NameError::MissingExtension(name.to_string()))?;

        let timestamp_ns =
            parse_timestamp(timestamp).ok_or_else(|| NameError::InvalidTimestamp {
                name: name.to_string(),
                timestamp: timestamp.to_string(),
            })?;

        Ok(Self {
            database,
            instance: instance.to_string(),
            timestamp_ns,
            generation: generation.to_string(),
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}.{}",
            self.database,
            self.instance,
            format_timestamp(self.timestamp_ns),
            self.generation,
            self.extension
        )
    }
}

impl FromStr for SnapshotName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Formats nanoseconds since the epoch as `YYYYMMDD-HHMMSS.nnnnnnnnn` (UTC).
#[must_use]
pub fn format_timestamp(timestamp_ns: u64) -> String {
    let secs = timestamp_ns / NANOS_PER_SEC;
    let nanos = timestamp_ns % NANOS_PER_SEC;
    let days = secs / SECS_PER_DAY;
    let rem = secs % SECS_PER_DAY;
    let (year, month, day) = civil_from_days(days as i64);
    format!(
        "{year:04}{month:02}{day:02}-{:02}{:02}{:02}.{nanos:09}",
        rem / 3600,
        (rem / 60) % 60,
        rem % 60
    )
}

/// Parses the output of [`format_timestamp`].
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<u64> {
    let b = s.as_bytes();
    if b.len() != TIMESTAMP_LEN || b[8] != b'-' || b[15] != b'.' {
        return None;
    }
    let year = digits(&b[0..4])? as i64;
    let month = digits(&b[4..6])? as u32;
    let day = digits(&b[6..8])? as u32;
    let hour = digits(&b[9..11])?;
    let minute = digits(&b[11..13])?;
    let second = digits(&b[13..15])?;
    let nanos = digits(&b[16..25])?;

    if !(1..=12).contains(&month)
        || day == 0
        || day > days_in_month(year, month)
        || hour > 23
        || minute > 59
        || second > 59
        || year < 1970
    {
        return None;
    }

    let days = days_from_civil(year, month, day) as u64;
    let secs = days * SECS_PER_DAY + hour * 3600 + minute * 60 + second;
    secs.checked_mul(NANOS_PER_SEC)?.checked_add(nanos)
}

fn digits(b: &[u8]) -> Option<u64> {
    b.iter().try_fold(0u64, |acc, c| {
        c.is_ascii_digit()
            .then(|| acc * 10 + u64::from(c - b'0'))
    })
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

// Civil calendar conversions after Howard Hinnant's date algorithms.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch() {
        assert_eq!(format_timestamp(0), "19700101-000000.000000000");
    }

    #[test]
    fn formats_known_instant() {
        // 2024-02-29T12:34:56.000000789Z
        let ts = 1_709_210_096 * NANOS_PER_SEC + 789;
        assert_eq!(format_timestamp(ts), "20240229-123456.000000789");
        assert_eq!(parse_timestamp("20240229-123456.000000789"), Some(ts));
    }

    #[test]
    fn name_roundtrip() {
        let name = SnapshotName::new("main", "node-a", 1_709_210_096_123_456_789, "0f3c").unwrap();
        let text = name.to_string();
        assert_eq!(text, "main__node-a__20240229-123456.123456789__0f3c.cbor");
        assert_eq!(text.parse::<SnapshotName>().unwrap(), name);
    }

    #[test]
    fn database_with_separator_parses() {
        let parsed: SnapshotName = "my__db__i__20240101-000000.000000000__g.cbor.gz"
            .parse()
            .unwrap();
        assert_eq!(parsed.database, "my__db");
        assert_eq!(parsed.instance, "i");
        assert_eq!(parsed.extension, "cbor.gz");
    }

    #[test]
    fn rejects_too_few_parts() {
        assert!(matches!(
            SnapshotName::parse("db__inst__20240101-000000.000000000.cbor"),
            Err(NameError::TooFewParts(_))
        ));
    }

    #[test]
    fn rejects_bad_timestamps() {
        for ts in [
            "20240101-000000",
            "2024010x-000000.000000000",
            "20240230-000000.000000000",
            "20240101-240000.000000000",
            "20240101 000000.000000000",
        ] {
            let name = format!("db__inst__{ts}__gen.cbor");
            assert!(
                matches!(
                    SnapshotName::parse(&name),
                    Err(NameError::InvalidTimestamp { .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_missing_extension() {
        assert!(matches!(
            SnapshotName::parse("db__inst__20240101-000000.000000000__gen"),
            Err(NameError::MissingExtension(_))
        ));
    }

    #[test]
    fn rejects_invalid_components() {
        assert!(SnapshotName::new("db", "a__b", 0, "g").is_err());
        assert!(SnapshotName::new("db", "", 0, "g").is_err());
        assert!(SnapshotName::new("db", "a", 0, "g.x").is_err());
    }

    #[test]
    fn names_sort_by_time() {
        let a = SnapshotName::new("db", "i", 5 * NANOS_PER_SEC, "g").unwrap();
        let b = SnapshotName::new("db", "i", 40 * NANOS_PER_SEC, "g").unwrap();
        assert!(a.to_string() < b.to_string());
    }
}
