use time::format_description::well_known::Rfc3339;

use crate::{RecallError, RecallResult};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Format as RFC 3339; falls back to the unix timestamp if the offset cannot be
/// represented.
pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s.trim(), &Rfc3339).ok()
}

/// Like [`parse_rfc3339`], but keeps the offending text in the error.
pub fn parse_rfc3339_strict(s: &str) -> RecallResult<OffsetDateTime> {
    parse_rfc3339(s).ok_or_else(|| RecallError::InvalidTimestamp {
        value: s.trim().chars().take(64).collect(),
    })
}

/// `ts + d`, pinned to the last representable instant instead of panicking.
pub fn saturating_add(ts: OffsetDateTime, d: Duration) -> OffsetDateTime {
    ts.checked_add(d)
        .unwrap_or_else(|| if d.is_negative() { min_utc() } else { max_utc() })
}

/// `ts - d`, pinned to the first representable instant instead of panicking.
pub fn saturating_sub(ts: OffsetDateTime, d: Duration) -> OffsetDateTime {
    ts.checked_sub(d)
        .unwrap_or_else(|| if d.is_negative() { max_utc() } else { min_utc() })
}

fn max_utc() -> OffsetDateTime {
    PrimitiveDateTime::MAX.assume_utc()
}

fn min_utc() -> OffsetDateTime {
    PrimitiveDateTime::MIN.assume_utc()
}

/// `HH:MM:SS` portion of a timestamp, for compact feed rendering.
pub fn clock(ts: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", ts.hour(), ts.minute(), ts.second())
}
