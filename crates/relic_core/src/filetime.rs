//! FILETIME conversion.
//!
//! NTFS timestamps are 64-bit counts of 100-ns intervals since
//! 1601-01-01 UTC. Display output is fixed at UTC+9 with the offset suffix.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serializer;

/// Seconds between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_DELTA_SECS: i64 = 11_644_473_600;

const TICKS_PER_SEC: u64 = 10_000_000;
const DISPLAY_OFFSET_SECS: i32 = 9 * 3600;

fn display_offset() -> FixedOffset {
    FixedOffset::east_opt(DISPLAY_OFFSET_SECS).expect("fixed +09:00 offset")
}

/// Converts a FILETIME to a UTC+9 wall-clock time. Returns `None` for 0
/// (unset) and for values past chrono's representable range.
pub fn to_datetime(filetime: u64) -> Option<DateTime<FixedOffset>> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / TICKS_PER_SEC) as i64 - FILETIME_UNIX_DELTA_SECS;
    let nanos = (filetime % TICKS_PER_SEC) as u32 * 100;
    let utc = DateTime::<Utc>::from_timestamp(secs, nanos)?;
    Some(utc.with_timezone(&display_offset()))
}

/// Converts a UTC+9 (or any offset) wall-clock time back to a FILETIME.
pub fn from_datetime(dt: &DateTime<FixedOffset>) -> u64 {
    let secs = dt.timestamp() + FILETIME_UNIX_DELTA_SECS;
    let subticks = (dt.timestamp_subsec_nanos() / 100) as u64;
    secs as u64 * TICKS_PER_SEC + subticks
}

/// ISO-8601 rendering with the 100-ns fraction and `+09:00` suffix.
/// A FILETIME of 0 renders as the empty string.
pub fn display(filetime: u64) -> String {
    match to_datetime(filetime) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.7f%:z").to_string(),
        None => String::new(),
    }
}

/// Parses the `display` rendering back to a FILETIME. Empty input is 0.
pub fn parse_display(text: &str) -> Option<u64> {
    if text.is_empty() {
        return Some(0);
    }
    let dt = DateTime::parse_from_rfc3339(text).ok()?;
    Some(from_datetime(&dt))
}

/// serde helper: serialize a raw FILETIME field as its display string.
pub fn serialize<S: Serializer>(filetime: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&display(*filetime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_boundary() {
        // 1970-01-01T00:00:00Z as FILETIME.
        let ft = FILETIME_UNIX_DELTA_SECS as u64 * TICKS_PER_SEC;
        let dt = to_datetime(ft).unwrap();
        assert_eq!(dt.timestamp(), 0);
        assert_eq!(display(ft), "1970-01-01T09:00:00.0000000+09:00");
    }

    #[test]
    fn zero_is_unset() {
        assert_eq!(display(0), "");
        assert!(to_datetime(0).is_none());
        assert_eq!(parse_display(""), Some(0));
    }

    #[test]
    fn round_trip_preserves_100ns() {
        // An arbitrary time with a non-zero 100-ns fraction.
        let ft = 133_500_000_012_345_678u64;
        let text = display(ft);
        assert!(text.ends_with("+09:00"), "{text}");
        assert_eq!(parse_display(&text), Some(ft));
    }

    #[test]
    fn display_offset_is_nine_hours() {
        let ft = (FILETIME_UNIX_DELTA_SECS as u64 + 3600) * TICKS_PER_SEC;
        assert_eq!(display(ft), "1970-01-01T10:00:00.0000000+09:00");
    }
}
