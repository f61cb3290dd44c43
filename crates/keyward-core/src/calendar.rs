//! # Calendar Rules
//!
//! License validity is tracked at calendar-date granularity. This module
//! owns the two date conventions that must never drift apart:
//!
//! - the wire format (`DD.MM.YYYY`) consumed by the encoder and the
//!   hardware-lock runtime, and
//! - the month arithmetic used when a license set is prolonged relative to
//!   "now".
//!
//! It also defines the expiry-scan window so the Postgres and in-memory
//! stores agree byte-for-byte on which rows are "about to expire".

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};

use crate::error::ValidationError;

/// Date format used in license files and in the stored validity columns.
pub const WIRE_DATE_FORMAT: &str = "%d.%m.%Y";

/// Format a validity date the way the wire format expects it (`DD.MM.YYYY`).
pub fn format_wire_date(date: NaiveDate) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse a `DD.MM.YYYY` wire date.
pub fn parse_wire_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s, WIRE_DATE_FORMAT).map_err(|e| ValidationError::InvalidDate {
        value: s.to_string(),
        reason: e.to_string(),
    })
}

/// Advance a date by whole calendar months, clamping to the last day of the
/// target month (Jan 31 + 1 month = Feb 28).
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// The date bounds of the expiry-scan window for a given instant and term.
///
/// A row is "about to expire" when `lower < end <= upper`. This is the
/// date-granularity equivalent of `midnight(end) ∈ [now, now + term)`:
/// a license whose end date is today has already reached its last day and
/// is not reported, while one ending exactly `term` from now still is.
pub fn expiry_window(now: DateTime<Utc>, term: Duration) -> (NaiveDate, NaiveDate) {
    (now.date_naive(), (now + term).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn wire_date_roundtrip() {
        let date = d(2026, 4, 26);
        assert_eq!(format_wire_date(date), "26.04.2026");
        assert_eq!(parse_wire_date("26.04.2026").unwrap(), date);
    }

    #[test]
    fn wire_date_rejects_iso_input() {
        let err = parse_wire_date("2026-04-26").unwrap_err();
        assert!(err.to_string().contains("2026-04-26"));
    }

    #[test]
    fn add_months_crosses_year_boundary() {
        assert_eq!(add_months(d(2026, 11, 15), 3), d(2027, 2, 15));
    }

    #[test]
    fn add_months_clamps_to_month_end() {
        assert_eq!(add_months(d(2026, 1, 31), 1), d(2026, 2, 28));
    }

    #[test]
    fn expiry_window_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 10, 30, 0).unwrap();
        let (lower, upper) = expiry_window(now, Duration::days(7));
        assert_eq!(lower, d(2026, 8, 7));
        assert_eq!(upper, d(2026, 8, 14));
    }
}
