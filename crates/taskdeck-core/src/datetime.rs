use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::{StoreError, StoreResult};

pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

const DEFAULT_TIMEZONE: &str = "UTC";

/// Brings a user supplied due date into canonical `YYYY-MM-DD` form.
///
/// Values containing `/` are read as `MM/DD/YYYY`. Anything else is
/// assumed canonical already and only trimmed.
#[tracing::instrument(fields(input = input))]
pub fn normalize_due_date(input: &str) -> StoreResult<String> {
    let token = input.trim();
    if !token.contains('/') {
        return Ok(token.to_string());
    }

    let slash_re = Regex::new(r"^(?P<month>\d{1,2})/(?P<day>\d{1,2})/(?P<year>\d{4})$")
        .map_err(|e| StoreError::validation(format!("internal regex compile failure: {e}")))?;

    let caps = slash_re.captures(token).ok_or_else(|| {
        StoreError::validation(format!("due date must be MM/DD/YYYY, got: {token}"))
    })?;

    let month: u32 = caps["month"]
        .parse()
        .map_err(|_| StoreError::validation(format!("invalid month in due date: {token}")))?;
    let day: u32 = caps["day"]
        .parse()
        .map_err(|_| StoreError::validation(format!("invalid day in due date: {token}")))?;
    let year: i32 = caps["year"]
        .parse()
        .map_err(|_| StoreError::validation(format!("invalid year in due date: {token}")))?;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        StoreError::validation(format!("due date does not exist on the calendar: {token}"))
    })?;

    let canonical = format_canonical_date(date);
    tracing::trace!(canonical = %canonical, "normalized slash-delimited due date");
    Ok(canonical)
}

#[must_use]
pub fn parse_canonical_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), CANONICAL_DATE_FORMAT).ok()
}

#[must_use]
pub fn format_canonical_date(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

/// Resolves a timezone id, falling back to UTC on empty or unknown input.
pub fn resolve_timezone(raw: Option<&str>) -> Tz {
    let Some(raw) = raw else {
        return chrono_tz::UTC;
    };
    parse_timezone(raw, "config").unwrap_or_else(|| {
        tracing::warn!(
            timezone = %raw,
            fallback = DEFAULT_TIMEZONE,
            "falling back to default timezone"
        );
        chrono_tz::UTC
    })
}

#[must_use]
pub fn today_in(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::debug!(source, timezone = %trimmed, "configured timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{normalize_due_date, parse_canonical_date, resolve_timezone, today_in};

    #[test]
    fn converts_slash_dates_to_canonical_form() {
        assert_eq!(normalize_due_date("03/20/2024").unwrap(), "2024-03-20");
        assert_eq!(normalize_due_date("3/5/2024").unwrap(), "2024-03-05");
    }

    #[test]
    fn passes_canonical_dates_through() {
        assert_eq!(normalize_due_date("2024-03-20").unwrap(), "2024-03-20");
        assert_eq!(normalize_due_date(" 2024-03-20 ").unwrap(), "2024-03-20");
    }

    #[test]
    fn rejects_slash_dates_missing_a_component() {
        assert!(normalize_due_date("03/2024").unwrap_err().is_validation());
        assert!(normalize_due_date("03//2024").unwrap_err().is_validation());
        assert!(normalize_due_date("aa/bb/cccc").unwrap_err().is_validation());
    }

    #[test]
    fn rejects_dates_missing_from_calendar() {
        assert!(normalize_due_date("02/30/2024").unwrap_err().is_validation());
        assert_eq!(normalize_due_date("02/29/2024").unwrap(), "2024-02-29");
    }

    #[test]
    fn parses_canonical_dates() {
        assert_eq!(
            parse_canonical_date("2024-03-20"),
            NaiveDate::from_ymd_opt(2024, 3, 20)
        );
        assert_eq!(parse_canonical_date("03/20/2024"), None);
    }

    #[test]
    fn today_follows_configured_timezone() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 2, 0, 0).unwrap();
        let tz = resolve_timezone(Some("America/Mexico_City"));
        assert_eq!(today_in(&tz, now), NaiveDate::from_ymd_opt(2024, 3, 19).unwrap());

        let fallback = resolve_timezone(Some("Not/AZone"));
        assert_eq!(today_in(&fallback, now), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
    }
}
