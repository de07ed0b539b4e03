use crate::config::{DateRange, PipelineConfig};
use crate::models::{NormalizedRowSet, VolRecord, YearMonth};
use chrono::Datelike;
use std::collections::BTreeMap;

/// Which slice of the raw exports a filter run extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionProfile {
    /// Strike-offset rows for implied-volatility surfaces
    Surface,
    /// `HIST` / `EWMA` rows for time series and daily shocks
    EwmaHist,
}

impl ExtractionProfile {
    pub const HIST_TYPE: &'static str = "HIST";
    pub const EWMA_CALL_PUT: &'static str = "EWMA";

    /// Filter criteria for this profile. Explicit record types or call/put
    /// values on the config take precedence over the profile defaults.
    pub fn criteria(&self, config: &PipelineConfig) -> FilterCriteria {
        let mut criteria = FilterCriteria::from_config(config);
        match self {
            ExtractionProfile::Surface => {
                if criteria.record_types.is_empty() {
                    criteria.record_types = normalize_all(&config.vocabulary.surface_types);
                }
            }
            ExtractionProfile::EwmaHist => {
                if criteria.record_types.is_empty() {
                    criteria.record_types = vec![Self::HIST_TYPE.to_string()];
                }
                if criteria.call_put.is_none() {
                    criteria.call_put = Some(Self::EWMA_CALL_PUT.to_string());
                }
            }
        }
        criteria
    }
}

/// Row predicates of the curve/type/date filter. String criteria are held
/// upper-cased; records arrive with `Type` and `Call/Put` already upper-cased.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub curves: Vec<String>,
    /// Empty keeps every type
    pub record_types: Vec<String>,
    pub call_put: Option<String>,
    pub year: String,
    pub month: Option<String>,
    /// Replaces the year predicate when present
    pub date_range: Option<DateRange>,
}

impl FilterCriteria {
    pub fn new(curves: &[String], year: impl Into<String>) -> Self {
        Self {
            curves: normalize_all(curves),
            record_types: Vec::new(),
            call_put: None,
            year: year.into(),
            month: None,
            date_range: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            curves: normalize_all(std::slice::from_ref(&config.curve)),
            record_types: normalize_all(&config.record_types),
            call_put: config.call_put.as_deref().map(normalize),
            year: config.year.clone(),
            month: config.month.clone(),
            date_range: config.date_range,
        }
    }

    pub fn matches(&self, record: &VolRecord) -> bool {
        if !self.curves.contains(&normalize(&record.basis)) {
            return false;
        }
        if !self.record_types.is_empty() && !self.record_types.contains(&record.record_type) {
            return false;
        }
        if let Some(cp) = &self.call_put {
            if &record.call_put != cp {
                return false;
            }
        }
        let in_period = match &self.date_range {
            Some(range) => range.contains(record.curve_date),
            None => record.curve_date.year().to_string() == self.year,
        };
        if !in_period {
            return false;
        }
        match &self.month {
            Some(month) => format!("{:02}", record.curve_date.month()) == *month,
            None => true,
        }
    }
}

/// Rows of one source file that survived the filter, with that file's headers.
#[derive(Debug, Clone)]
pub struct FilteredGroup {
    pub headers: Vec<String>,
    pub records: Vec<VolRecord>,
}

/// Apply the criteria to one normalized file and bucket the survivors by the
/// year-month of their own `Curve_Date`.
pub fn filter_records(
    set: &NormalizedRowSet,
    criteria: &FilterCriteria,
) -> BTreeMap<YearMonth, FilteredGroup> {
    let mut buckets: BTreeMap<YearMonth, FilteredGroup> = BTreeMap::new();
    for record in set.records.iter().filter(|r| criteria.matches(r)) {
        buckets
            .entry(record.year_month())
            .or_insert_with(|| FilteredGroup {
                headers: set.headers.clone(),
                records: Vec::new(),
            })
            .records
            .push(record.clone());
    }
    buckets
}

fn normalize(s: &str) -> String {
    s.trim().to_uppercase()
}

fn normalize_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| normalize(v)).collect()
}
