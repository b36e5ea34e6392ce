use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::AppError;

/// History window used when the caller gives no bounds.
pub const DEFAULT_HISTORY_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Resolves `from`/`to` into a window. `to` defaults to `now`, `from` to
/// 30 days before `to`.
pub fn history_window(
    query: &HistoryQuery,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let to = match present(query.to.as_deref()) {
        Some(raw) => parse_bound("to", raw)?,
        None => now,
    };
    let from = match present(query.from.as_deref()) {
        Some(raw) => parse_bound("from", raw)?,
        None => to
            .checked_sub_signed(Duration::days(DEFAULT_HISTORY_DAYS))
            .ok_or_else(|| {
                AppError::validation("`to` is too early to open a default window")
                    .with_detail("field", "to")
            })?,
    };

    if from > to {
        return Err(AppError::validation("`from` must not be after `to`"));
    }
    Ok((from, to))
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_bound(name: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Some(t) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc());
    }
    Err(AppError::validation(format!("Invalid `{name}` date: {raw}")).with_detail("field", name))
}

/// Parses vendor timestamps, which come with or without a zone and with
/// either `T` or a space as separator. Zone-less values are taken as UTC.
pub fn parse_vendor_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

/// Treats empty or whitespace-only strings as absent.
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn present_owned(value: Option<String>) -> Option<String> {
    present(value.as_deref()).map(String::from)
}

/// Collects the names of absent required fields.
pub fn missing(fields: &[(&'static str, bool)]) -> Vec<&'static str> {
    fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect()
}
