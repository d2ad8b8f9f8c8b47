use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

const NANOS_PER_MICRO: i128 = 1_000;

pub fn now_utc_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format current timestamp as RFC3339")
}

/// Fixed-width UTC rendering with microsecond precision, e.g.
/// `2026-02-25T00:00:00.000000Z`. Stats columns sort lexically with this.
#[must_use]
pub fn format_utc(timestamp: OffsetDateTime) -> String {
    let dt = timestamp.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.microsecond()
    )
}

/// Seconds since the unix epoch as a float, truncated to microseconds.
#[must_use]
pub fn unix_seconds(timestamp: OffsetDateTime) -> f64 {
    let micros = timestamp.unix_timestamp_nanos() / NANOS_PER_MICRO;
    micros as f64 / 1_000_000.0
}

#[must_use]
pub fn build_run_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos() as u64);
    format!("{prefix}-{nanos:016x}")
}
