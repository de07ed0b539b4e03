//! Lenient calendar-date parsing for vendor exports.
//!
//! Exports arrive with ISO dates, US-style dates, compact `YYYYMMDD` stamps and
//! full timestamps depending on the desk that produced them. Everything is
//! reduced to a `NaiveDate`; the time component is discarded. Timestamps with
//! a UTC offset keep the calendar date written in the cell.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z"];

const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m-%d-%Y", "%Y%m%d", "%d-%b-%Y"];

/// Parse a date cell, returning `None` for anything unrecognisable.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Some(d) = parse_offset_timestamp(trimmed) {
        return Some(d);
    }

    let s = trimmed.trim_end_matches('Z');
    if s.is_empty() {
        return None;
    }

    for fmt in &DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    for fmt in &DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    None
}

fn parse_offset_timestamp(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.date_naive())
}

/// Proleptic Gregorian ordinal (0001-01-01 is day 1), used as the date axis of
/// surface plots.
pub fn date_ordinal(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.num_days_from_ce()
}

pub fn from_ordinal(ordinal: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        for raw in [
            "2024-01-05",
            " 2024-01-05 ",
            "2024/01/05",
            "01/05/2024",
            "20240105",
            "2024-01-05 00:00:00",
            "2024-01-05T16:30:00Z",
            "2024-01-05T16:30:00+00:00",
            "2024-01-05T16:30:00-05:00",
            "2024-01-05T23:30:00.250-05:00",
            "2024-01-05 08:00:00+09:00",
        ] {
            assert_eq!(parse_date(raw), Some(expected), "failed on {raw:?}");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2024-13-40"), None);
    }

    #[test]
    fn ordinal_matches_python_convention() {
        let d = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        assert_eq!(date_ordinal(d), 1);
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(from_ordinal(date_ordinal(d)), Some(d));
    }
}
