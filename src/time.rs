//! Time axis helpers: CF time decoding and calendar-day arithmetic.
//!
//! Time coordinates are held as seconds since 1970-01-01 00:00:00 (UTC, no leap seconds).

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Units attribute written on decoded time coordinates.
pub const EPOCH_UNITS: &str = "seconds since 1970-01-01 00:00:00";

pub fn to_seconds(dt: NaiveDateTime) -> f64 {
    let utc = dt.and_utc();
    utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9
}

pub fn from_seconds(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).map(|d| d.naive_utc())
}

/// Length in seconds of a CF duration unit (`hours`, `days`, ...).
pub fn unit_seconds(unit: &str) -> Option<f64> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => Some(1.0),
        "minutes" | "minute" | "mins" | "min" => Some(60.0),
        "hours" | "hour" | "hrs" | "hr" | "h" => Some(3600.0),
        "days" | "day" | "d" => Some(86400.0),
        _ => None,
    }
}

/// Decodes CF time values (`<unit> since <reference>`) into seconds since the epoch.
pub fn decode_cf_time(values: &[f64], units: &str) -> Result<Vec<f64>> {
    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| anyhow!("not a CF time unit: '{units}'"))?;
    let scale = unit_seconds(unit).ok_or_else(|| anyhow!("unsupported time unit '{unit}'"))?;
    let offset = to_seconds(parse_reference(reference)?);
    Ok(values.iter().map(|v| offset + v * scale).collect())
}

fn parse_reference(reference: &str) -> Result<NaiveDateTime> {
    let cleaned = reference
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim_end_matches("+00:00")
        .replace('T', " ");
    let mut parts = cleaned.split_whitespace();
    let date_str = parts
        .next()
        .ok_or_else(|| anyhow!("empty time reference"))?;
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid reference date '{date_str}': {e}"))?;
    let time = match parts.next() {
        None => NaiveTime::MIN,
        Some(t) => ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(t, fmt).ok())
            .ok_or_else(|| anyhow!("invalid reference time '{t}'"))?,
    };
    Ok(date.and_time(time))
}

/// Every calendar day from `first` to `last`, both included.
pub fn days_inclusive(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    first.iter_days().take_while(|d| *d <= last).collect()
}

pub fn format_seconds(seconds: f64) -> String {
    from_seconds(seconds)
        .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{seconds} s"))
}

pub(crate) fn ensure_increasing(values: &[f64]) -> Result<()> {
    if let Some(w) = values.windows(2).find(|w| w[1] <= w[0]) {
        bail!(
            "time axis is not strictly increasing ({} then {})",
            format_seconds(w[0]),
            format_seconds(w[1])
        );
    }
    Ok(())
}
