//! Run-boundary arithmetic and timestamp helpers.
//!
//! All instants are UTC. Run boundaries are multiples of the run interval
//! counted from the Unix epoch (00, 06, 12, 18 UTC for a 6 hour interval).

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};

/// Julian day number of 1970-01-01 (at 12h UTC).
const UNIX_EPOCH_JD: i64 = 2_440_588;

/// Rounds `instant` down to the previous multiple of `interval`.
pub fn floor_to_interval(instant: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds();
    if step <= 0 {
        return instant;
    }
    let ms = instant.timestamp_millis();
    let floored = ms.div_euclid(step) * step;
    Utc.timestamp_millis_opt(floored).single().unwrap_or(instant)
}

/// Rounds `instant` to the nearest multiple of `interval` (halves round up).
pub fn round_to_interval(instant: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    floor_to_interval(instant + interval / 2, interval)
}

/// Returns the most recent run whose output should be published at `now`.
///
/// `delay` is the time the provider needs until a run's data is available.
/// With a 6h interval and a 5h delay, 15:00 UTC yields 06:00 UTC.
pub fn current_run(now: DateTime<Utc>, interval: Duration, delay: Duration) -> DateTime<Utc> {
    floor_to_interval(now - delay, interval)
}

/// First valid time shown in the charts: the last run boundary at least one
/// interval in the past.
pub fn window_start(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    floor_to_interval(now - interval, interval)
}

/// Snaps a provider reference time onto a run boundary.
///
/// Providers occasionally report reference times slightly before the
/// boundary after import problems, so one minute is added before flooring.
pub fn snap_reference_time(reference: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    floor_to_interval(reference + Duration::minutes(1), interval)
}

/// Parses an ISO-like upstream timestamp as UTC.
///
/// A trailing `Z` or explicit offset is honoured; timestamps without any
/// zone marker are taken as UTC as well.
pub fn parse_upstream_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .with_context(|| format!("unrecognised timestamp '{raw}'"))?;
    Ok(naive.and_utc())
}

/// Julian day number of the calendar day containing `instant` (noon based).
pub fn julian_day(instant: DateTime<Utc>) -> i64 {
    let days = (0.5 + instant.timestamp_millis() as f64 / 86_400_000.0).floor() as i64;
    days + UNIX_EPOCH_JD
}

/// Maps a valid time onto the climatology table's calendar axis.
///
/// The table is indexed by 6-hourly timestamps inside one fixed reference
/// year. Returns `None` when the day does not exist in that year (29 Feb).
pub fn climatology_time(valid: DateTime<Utc>, reference_year: i32) -> Option<DateTime<Utc>> {
    round_to_interval(valid, Duration::hours(6)).with_year(reference_year)
}
