//! Time handling for the tile services.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{OwsError, OwsResult};

/// Timestamp format used in index queries and readable band namespaces.
pub const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Accepted input formats. The second exists for third-party client
/// compatibility (e.g. QGIS omits fractional seconds).
const ISO_INPUT_FORMATS: &[&str] = &[ISO_FORMAT, "%Y-%m-%dT%H:%M:%SZ"];

/// Parse an ISO-8601 UTC timestamp in one of the accepted formats.
pub fn parse_iso(input: &str) -> OwsResult<DateTime<Utc>> {
    for format in ISO_INPUT_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    Err(OwsError::InvalidTime(input.to_string()))
}

/// Format a timestamp the way index queries expect it.
pub fn format_iso(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Seconds since epoch for an axis value on the `time` axis.
pub fn to_epoch(t: &DateTime<Utc>) -> f64 {
    t.timestamp() as f64
}

/// Timestamp from an epoch-seconds axis value.
pub fn from_epoch(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}
