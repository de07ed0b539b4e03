use crate::error::{Result, VolPipelineError};
use crate::utils::dates::parse_date;
use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Column names of the vendor export.
pub mod columns {
    pub const BASIS: &str = "Basis";
    pub const TYPE: &str = "Type";
    pub const CALL_PUT: &str = "Call/Put";
    pub const CURVE_DATE: &str = "Curve_Date";
    pub const DATE: &str = "date";
    pub const MID: &str = "Mid";
    pub const CONTRACT_MONTH: &str = "Contract_Month";
    pub const YEAR: &str = "year";
    pub const MONTH: &str = "month";
}

/// Raw tabular contents of one source file: sanitized headers plus string
/// cells, every row padded or checked to the header width by the reader.
#[derive(Debug, Clone)]
pub struct RecordSet {
    pub source: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RecordSet {
    pub fn new(source: impl Into<PathBuf>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            source: source.into(),
            headers,
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// `Curve_Date` when present, otherwise the lower-case `date` column
    /// written by the aggregator.
    pub fn date_column(&self) -> Option<usize> {
        self.column_index(columns::CURVE_DATE)
            .or_else(|| self.column_index(columns::DATE))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Calendar month bucket, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse a `YYYY-MM` key, e.g. a monthly artifact's file stem.
    pub fn parse(key: &str) -> Option<Self> {
        let (y, m) = key.split_once('-')?;
        if y.len() != 4 || m.len() != 2 {
            return None;
        }
        let year = y.parse().ok()?;
        let month = m.parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn year_label(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn month_label(&self) -> String {
        format!("{:02}", self.month)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One normalized source row. `values` holds every source cell in header
/// order with the filter fields rewritten to their normalized form.
#[derive(Debug, Clone)]
pub struct VolRecord {
    pub basis: String,
    pub record_type: String,
    pub call_put: String,
    pub curve_date: NaiveDate,
    pub values: Vec<String>,
}

impl VolRecord {
    pub fn year_month(&self) -> YearMonth {
        YearMonth::from_date(self.curve_date)
    }
}

/// A record set after header lookup, value normalization and date parsing.
/// Every retained record has a valid `curve_date`.
#[derive(Debug, Clone)]
pub struct NormalizedRowSet {
    pub source: PathBuf,
    pub headers: Vec<String>,
    pub records: Vec<VolRecord>,
    pub dropped_dates: usize,
}

impl NormalizedRowSet {
    /// Normalize a raw record set. Fails with `MissingColumns` when any of
    /// `Basis`, `Type` or a date column is absent; rows whose date cannot be
    /// parsed are dropped individually.
    pub fn from_record_set(set: RecordSet) -> Result<Self> {
        let basis_idx = set.column_index(columns::BASIS);
        let type_idx = set.column_index(columns::TYPE);
        let date_idx = set.date_column();

        let (basis_idx, type_idx, date_idx) = match (basis_idx, type_idx, date_idx) {
            (Some(b), Some(t), Some(d)) => (b, t, d),
            _ => {
                let mut missing = Vec::new();
                if basis_idx.is_none() {
                    missing.push(columns::BASIS.to_string());
                }
                if type_idx.is_none() {
                    missing.push(columns::TYPE.to_string());
                }
                if date_idx.is_none() {
                    missing.push(columns::CURVE_DATE.to_string());
                }
                return Err(VolPipelineError::MissingColumns {
                    path: set.source,
                    columns: missing,
                });
            }
        };
        let call_put_idx = set.column_index(columns::CALL_PUT);

        let mut records = Vec::with_capacity(set.rows.len());
        let mut dropped_dates = 0;

        for mut values in set.rows {
            let curve_date = match values.get(date_idx).and_then(|v| parse_date(v)) {
                Some(d) => d,
                None => {
                    dropped_dates += 1;
                    continue;
                }
            };

            let basis = values[basis_idx].trim().to_string();
            let record_type = values[type_idx].trim().to_uppercase();
            let call_put = call_put_idx
                .map(|i| values[i].trim().to_uppercase())
                .unwrap_or_default();

            values[basis_idx] = basis.clone();
            values[type_idx] = record_type.clone();
            if let Some(i) = call_put_idx {
                values[i] = call_put.clone();
            }
            values[date_idx] = curve_date.format("%Y-%m-%d").to_string();

            records.push(VolRecord {
                basis,
                record_type,
                call_put,
                curve_date,
                values,
            });
        }

        if dropped_dates > 0 {
            debug!(
                "Dropped {} rows with unparseable dates from {}",
                dropped_dates,
                set.source.display()
            );
        }

        Ok(Self {
            source: set.source,
            headers: set.headers,
            records,
            dropped_dates,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(headers: &[&str], rows: &[&[&str]]) -> RecordSet {
        RecordSet::new(
            "sample.csv",
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn normalizes_filter_fields_and_dates() {
        let set = sample(
            &["Basis", "Type", "Call/Put", "Curve_Date", "Mid"],
            &[
                &[" NYMEX ", " atm + $0.25", "ewma ", "01/03/2024", "0.41"],
                &["NYMEX", "ATM", "C", "garbage", "0.40"],
            ],
        );
        let normalized = NormalizedRowSet::from_record_set(set).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.dropped_dates, 1);

        let rec = &normalized.records[0];
        assert_eq!(rec.basis, "NYMEX");
        assert_eq!(rec.record_type, "ATM + $0.25");
        assert_eq!(rec.call_put, "EWMA");
        assert_eq!(rec.curve_date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(rec.values, vec!["NYMEX", "ATM + $0.25", "EWMA", "2024-01-03", "0.41"]);
    }

    #[test]
    fn reports_missing_columns() {
        let set = sample(&["Basis", "Mid"], &[&["NYMEX", "0.4"]]);
        match NormalizedRowSet::from_record_set(set) {
            Err(VolPipelineError::MissingColumns { columns, .. }) => {
                assert_eq!(columns, vec!["Type".to_string(), "Curve_Date".to_string()]);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_lowercase_date_column() {
        let set = sample(&["Basis", "Type", "date"], &[&["HSC", "HIST", "2024-02-01"]]);
        let normalized = NormalizedRowSet::from_record_set(set).unwrap();
        assert_eq!(normalized.records[0].year_month().to_string(), "2024-02");
        assert_eq!(normalized.records[0].call_put, "");
    }

    #[test]
    fn year_month_keys() {
        let ym = YearMonth::parse("2024-03").unwrap();
        assert_eq!(ym.year_label(), "2024");
        assert_eq!(ym.month_label(), "03");
        assert!(ym.contains(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()));
        assert!(!ym.contains(NaiveDate::from_ymd_opt(2023, 3, 31).unwrap()));
        assert_eq!(YearMonth::parse("2024-13"), None);
        assert_eq!(YearMonth::parse("2024_combined"), None);
    }
}
