use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

/// "9 April 2025 11:00am", with the time-of-day part optional.
static TEXT_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d{1,2})\s+(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{4})(?:\s+(\d{1,2}):(\d{2})\s*(am|pm)?)?",
    )
    .unwrap()
});

/// "09/04/2025", day first.
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").unwrap());

/// Parse a UK-formatted date or datetime out of free text.
///
/// Times are wall-clock London times and come back as UTC. A date with
/// no time component is taken as midnight.
pub fn parse_uk_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Some(caps) = TEXT_DATE_RE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        let (hour, minute) = match (caps.get(4), caps.get(5)) {
            (Some(h), Some(m)) => {
                let mut hour: u32 = h.as_str().parse().ok()?;
                let minute: u32 = m.as_str().parse().ok()?;
                match caps.get(6).map(|ap| ap.as_str().to_ascii_lowercase()) {
                    Some(ref ap) if ap == "pm" && hour != 12 => hour += 12,
                    Some(ref ap) if ap == "am" && hour == 12 => hour = 0,
                    _ => {}
                }
                (hour, minute)
            }
            _ => (0, 0),
        };
        let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
        return Some(london_to_utc(local));
    }

    if let Some(caps) = NUMERIC_DATE_RE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
        return Some(london_to_utc(local));
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    match name.to_ascii_lowercase().as_str() {
        "january" => Some(1),
        "february" => Some(2),
        "march" => Some(3),
        "april" => Some(4),
        "may" => Some(5),
        "june" => Some(6),
        "july" => Some(7),
        "august" => Some(8),
        "september" => Some(9),
        "october" => Some(10),
        "november" => Some(11),
        "december" => Some(12),
        _ => None,
    }
}

/// Interpret a naive London wall-clock time as UTC. Summer time runs
/// from 01:00 UTC on the last Sunday of March to 01:00 UTC on the last
/// Sunday of October, when London is UTC+1.
fn london_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    let as_utc = Utc.from_utc_datetime(&local);
    let candidate = as_utc - Duration::hours(1);
    match bst_window(local.year()) {
        Some((start, end)) if candidate >= start && candidate < end => candidate,
        _ => as_utc,
    }
}

fn bst_window(year: i32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = last_sunday(year, 3)?.and_hms_opt(1, 0, 0)?;
    let end = last_sunday(year, 10)?.and_hms_opt(1, 0, 0)?;
    Some((Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end)))
}

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    let last = NaiveDate::from_ymd_opt(year, month, 31)?;
    Some(last - Duration::days(last.weekday().num_days_from_sunday() as i64))
}

// ── Tests ──
