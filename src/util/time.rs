//! POSIX-time bounds, feed age arithmetic and GTFS clock formatting.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::path::Path;

/// 2005-01-01T00:00:00Z
pub const MIN_POSIX_TIME: u64 = 1_104_537_600;
/// 2033-02-10T05:08:54Z
pub const MAX_POSIX_TIME: u64 = 1_991_620_134;

pub fn is_posix(timestamp: u64) -> bool {
    (MIN_POSIX_TIME..=MAX_POSIX_TIME).contains(&timestamp)
}

/// Milliseconds elapsed between `timestamp_secs` and `now_millis`. Negative when
/// the timestamp lies in the future.
pub fn age_millis(now_millis: i64, timestamp_secs: u64) -> i64 {
    now_millis - (timestamp_secs as i64).saturating_mul(1000)
}

/// True when `timestamp_secs` is ahead of `now_millis` by more than
/// `tolerance_secs` whole seconds.
pub fn is_in_future(now_millis: i64, timestamp_secs: u64, tolerance_secs: u64) -> bool {
    let age = age_millis(now_millis, timestamp_secs);
    age < 0 && (age.unsigned_abs() / 1000) > tolerance_secs
}

/// Splits a duration into whole minutes and the remaining seconds, both
/// non-negative.
pub fn minutes_seconds(millis: i64) -> (u64, u64) {
    let secs = millis.unsigned_abs() / 1000;
    (secs / 60, secs % 60)
}

/// Renders a POSIX timestamp as `HH:MM:SS` in the agency timezone.
pub fn posix_to_clock(timestamp_secs: i64, tz: Tz) -> String {
    DateTime::from_timestamp(timestamp_secs, 0)
        .map(|t| t.with_timezone(&tz).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_secs.to_string())
}

/// Renders seconds after midnight as `HH:MM:SS`; hours may exceed 23.
pub fn seconds_to_clock(seconds_after_midnight: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds_after_midnight / 3600,
        (seconds_after_midnight / 60) % 60,
        seconds_after_midnight % 60
    )
}

/// Parses a GTFS `H:MM:SS` / `HH:MM:SS` time into seconds after midnight.
pub fn parse_gtfs_time(value: &str) -> Option<u32> {
    let mut parts = value.trim().split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || m > 59 || s > 59 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

/// Checks the realtime `start_time` layout: `H:MM:SS` or `HH:MM:SS`, hours up to 29.
pub fn is_valid_time_format(value: &str) -> bool {
    let b = value.as_bytes();
    if b.len() != 7 && b.len() != 8 {
        return false;
    }
    let (hours, rest) = b.split_at(b.len() - 6);
    let hours_ok = match hours {
        [h] => h.is_ascii_digit(),
        [h1, h2] => (b'0'..=b'2').contains(h1) && h2.is_ascii_digit(),
        _ => false,
    };
    hours_ok
        && rest[0] == b':'
        && (b'0'..=b'5').contains(&rest[1])
        && rest[2].is_ascii_digit()
        && rest[3] == b':'
        && (b'0'..=b'5').contains(&rest[4])
        && rest[5].is_ascii_digit()
}

/// Checks the realtime `start_date` layout `YYYYMMDD` and that it names a real date.
pub fn is_valid_date_format(value: &str) -> bool {
    value.len() == 8 && NaiveDate::parse_from_str(value, "%Y%m%d").is_ok()
}

/// Extracts the capture time embedded at the end of an archived feed file name,
/// e.g. `TripUpdates-2017-02-18T20-00-08Z.pb`.
pub fn timestamp_from_file_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() < 20 || !stem.is_char_boundary(stem.len() - 20) {
        return None;
    }
    let tail = &stem[stem.len() - 20..];
    let (date, time) = tail.split_at(10);
    let iso = format!("{}{}", date, time.replace('-', ":"));
    DateTime::parse_from_rfc3339(&iso)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
