//! Persistence of filtered rows as monthly artifacts and the yearly roll-up.

use crate::error::Result;
use crate::models::record::columns;
use crate::models::{RecordSet, YearMonth};
use crate::pipeline::filter::{ExtractionProfile, FilteredGroup};
use crate::pipeline::reader::read_records;
use crate::pipeline::file_safe_label;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EWMA_MONTHLY_SUFFIX: &str = "_ewma_hist.csv";

impl ExtractionProfile {
    pub fn monthly_file_name(&self, ym: YearMonth, curve: &str) -> String {
        match self {
            ExtractionProfile::Surface => format!("{}.csv", ym),
            ExtractionProfile::EwmaHist => {
                format!("{}_{}{}", file_safe_label(curve), ym, EWMA_MONTHLY_SUFFIX)
            }
        }
    }

    pub fn combined_file_name(&self, year: &str, curve: &str) -> String {
        match self {
            ExtractionProfile::Surface => format!("{}_combined.csv", year),
            ExtractionProfile::EwmaHist => {
                format!("{}_{}_ewma_hist_combined.csv", file_safe_label(curve), year)
            }
        }
    }

    /// Whether a file in the output folder is a monthly artifact of this profile.
    pub fn is_monthly_artifact(&self, file_name: &str) -> bool {
        match self {
            ExtractionProfile::Surface => file_name
                .strip_suffix(".csv")
                .and_then(YearMonth::parse)
                .is_some(),
            ExtractionProfile::EwmaHist => file_name.ends_with(EWMA_MONTHLY_SUFFIX),
        }
    }
}

/// Filtered rows collected across every input file, keyed by year-month.
/// Within a key, groups keep file discovery order.
#[derive(Debug, Default)]
pub struct MonthlyAccumulator {
    buckets: BTreeMap<YearMonth, Vec<FilteredGroup>>,
}

impl MonthlyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, partitioned: BTreeMap<YearMonth, FilteredGroup>) {
        for (ym, group) in partitioned {
            if !group.records.is_empty() {
                self.buckets.entry(ym).or_default().push(group);
            }
        }
    }

    pub fn row_count(&self, ym: YearMonth) -> usize {
        self.buckets
            .get(&ym)
            .map(|groups| groups.iter().map(|g| g.records.len()).sum())
            .unwrap_or(0)
    }

    /// Write one artifact per year-month and return their paths.
    pub fn write_monthly(
        &self,
        output_dir: &Path,
        profile: ExtractionProfile,
        curve: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.buckets.len());
        for (ym, groups) in &self.buckets {
            info!("Processing {} ({} rows)", ym, self.row_count(*ym));
            let (headers, rows) = monthly_table(groups);
            let path = output_dir.join(profile.monthly_file_name(*ym, curve));
            write_table(&path, &headers, &rows)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Flatten the groups of one month into a single table. Headers are the
/// union across groups in first-seen order, followed by the derived
/// `year`, `month` and `date` columns.
fn monthly_table(groups: &[FilteredGroup]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = Vec::new();
    for group in groups {
        for h in &group.headers {
            if !headers.contains(h) {
                headers.push(h.clone());
            }
        }
    }
    for derived in [columns::YEAR, columns::MONTH, columns::DATE] {
        if !headers.iter().any(|h| h == derived) {
            headers.push(derived.to_string());
        }
    }

    let mut rows = Vec::new();
    for group in groups {
        let positions: Vec<usize> = group
            .headers
            .iter()
            .map(|h| headers.iter().position(|x| x == h).unwrap_or_default())
            .collect();
        for record in &group.records {
            let mut row = vec![String::new(); headers.len()];
            for (value, &pos) in record.values.iter().zip(&positions) {
                row[pos] = value.clone();
            }
            let ym = record.year_month();
            set_cell(&headers, &mut row, columns::YEAR, ym.year_label());
            set_cell(&headers, &mut row, columns::MONTH, ym.month_label());
            set_cell(
                &headers,
                &mut row,
                columns::DATE,
                record.curve_date.format("%Y-%m-%d").to_string(),
            );
            rows.push(row);
        }
    }
    (headers, rows)
}

fn set_cell(headers: &[String], row: &mut [String], name: &str, value: String) {
    if let Some(i) = headers.iter().position(|h| h == name) {
        row[i] = value;
    }
}

fn write_table(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Concatenate record sets into one table over the union of their headers.
pub fn concat_record_sets(sets: &[RecordSet]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = Vec::new();
    for set in sets {
        for h in &set.headers {
            if !headers.contains(h) {
                headers.push(h.clone());
            }
        }
    }
    let mut rows = Vec::new();
    for set in sets {
        let positions: Vec<usize> = set
            .headers
            .iter()
            .map(|h| headers.iter().position(|x| x == h).unwrap_or_default())
            .collect();
        for source in &set.rows {
            let mut row = vec![String::new(); headers.len()];
            for (value, &pos) in source.iter().zip(&positions) {
                row[pos] = value.clone();
            }
            rows.push(row);
        }
    }
    (headers, rows)
}

/// Re-read every monthly artifact of the profile in `output_dir` (sorted by
/// name) and write the yearly combined file. Returns `None` when there is
/// nothing to combine.
pub fn write_combined(
    output_dir: &Path,
    profile: ExtractionProfile,
    year: &str,
    curve: &str,
) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = std::fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| profile.is_monthly_artifact(name))
        .collect();
    names.sort();

    let sets: Vec<RecordSet> = names
        .iter()
        .filter_map(|name| read_records(&output_dir.join(name)))
        .collect();

    if sets.is_empty() {
        warn!("No monthly artifacts to combine in {}", output_dir.display());
        return Ok(None);
    }

    let (headers, rows) = concat_record_sets(&sets);
    let path = output_dir.join(profile.combined_file_name(year, curve));
    write_table(&path, &headers, &rows)?;
    debug!("Combined {} monthly files into {}", sets.len(), path.display());
    info!("{} has been created ({} rows)", path.display(), rows.len());
    Ok(Some(path))
}
