//! Batch stages of the volatility pipeline.
//!
//! Each stage reads a folder, writes artifacts into another folder and
//! returns a small report. Artifacts are discovered by callers through file
//! names, so stages never hand back in-memory results they did not persist.
//! Two invocations must not share an output folder.

pub mod aggregate;
pub mod filter;
pub mod reader;
pub mod surface;
pub mod time_series;

use crate::config::PipelineConfig;
use crate::error::{Result, VolPipelineError};
use crate::models::{NormalizedRowSet, RecordSet, YearMonth};
use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use aggregate::{write_combined, MonthlyAccumulator};
pub use filter::{filter_records, ExtractionProfile, FilterCriteria, FilteredGroup};
pub use reader::{read_records, try_read_records, ReadFailure};
pub use surface::{build_surfaces, run_surface_stage, SurfaceArtifact, SurfacePeriod, SurfaceReport};
pub use time_series::{
    build_time_series, run_time_series_stage, SourceSchema, TimeSeriesReport, TimeSeriesRequest,
    TimeSeriesSet,
};

/// Outcome of a filter run
#[derive(Debug, Clone, Default)]
pub struct FilterReport {
    pub files_found: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_kept: usize,
    pub monthly_artifacts: Vec<PathBuf>,
    pub combined_artifact: Option<PathBuf>,
}

/// Replace characters that do not belong in a file name.
pub fn file_safe_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Month filter of the builders. `MM` matches that month in any year,
/// `YYYY-MM` a single month; no filter matches every date.
pub(crate) fn month_matches(month: Option<&str>, date: NaiveDate) -> bool {
    let Some(month) = month.map(str::trim) else {
        return true;
    };
    match YearMonth::parse(month) {
        Some(ym) => ym.contains(date),
        None => month.parse::<u32>().map(|m| m == date.month()).unwrap_or(false),
    }
}

/// Every `.csv` below `dir`, recursively, sorted by path. Hidden files are
/// ignored. A missing folder yields an empty list.
pub fn discover_csv_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", current.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if path.is_dir() {
                pending.push(path);
            } else if name.to_lowercase().ends_with(".csv") {
                found.push(path);
            }
        }
    }

    found.sort();
    found
}

/// Files a builder should read from a filtered folder. Yearly roll-ups are
/// left out whenever per-month artifacts are present so rows are not read
/// twice.
pub fn filtered_inputs(dir: &Path) -> Vec<PathBuf> {
    let files = discover_csv_files(dir);
    let is_combined = |p: &PathBuf| {
        p.file_stem()
            .map(|s| s.to_string_lossy().ends_with("_combined"))
            .unwrap_or(false)
    };
    if files.iter().any(|p| !is_combined(p)) {
        files.into_iter().filter(|p| !is_combined(p)).collect()
    } else {
        files
    }
}

/// Run the curve/type/date filter over the input folder and persist the
/// monthly and combined artifacts of `profile` into `output_dir`.
pub fn filter_to_dir(
    config: &PipelineConfig,
    profile: ExtractionProfile,
    output_dir: &Path,
) -> Result<FilterReport> {
    info!(
        "Filtering {:?} data for {} ({}) from {}",
        profile,
        config.curve,
        config
            .date_range
            .map(|r| format!("{} to {}", r.start, r.end))
            .unwrap_or_else(|| config.year.clone()),
        config.input_dir.display()
    );

    std::fs::create_dir_all(output_dir).map_err(|e| {
        VolPipelineError::Other(format!(
            "Cannot create output folder {}: {}",
            output_dir.display(),
            e
        ))
    })?;

    let criteria = profile.criteria(config);
    let files = discover_csv_files(&config.input_dir);
    let mut report = FilterReport {
        files_found: files.len(),
        ..Default::default()
    };
    let mut accumulator = MonthlyAccumulator::new();

    for path in &files {
        let Some(set) = read_records(path) else {
            report.files_skipped += 1;
            continue;
        };
        let normalized = match NormalizedRowSet::from_record_set(set) {
            Ok(n) => n,
            Err(e) => {
                warn!("{}", e);
                report.files_skipped += 1;
                continue;
            }
        };
        let partitioned = filter_records(&normalized, &criteria);
        report.rows_kept += partitioned.values().map(|g| g.records.len()).sum::<usize>();
        accumulator.add(partitioned);
        report.files_processed += 1;
    }

    info!(
        "Found {} CSV files, processed {} files",
        report.files_found, report.files_processed
    );

    report.monthly_artifacts = accumulator.write_monthly(output_dir, profile, &config.curve)?;
    report.combined_artifact = write_combined(output_dir, profile, &config.year, &config.curve)?;
    Ok(report)
}

/// Filter stage with the profile's conventional folder under the run's
/// output root (`filtered/` or `ewma/`).
pub fn run_filter_stage(config: &PipelineConfig, profile: ExtractionProfile) -> Result<FilterReport> {
    let output_dir = match profile {
        ExtractionProfile::Surface => config.filtered_dir(),
        ExtractionProfile::EwmaHist => config.ewma_dir(),
    };
    filter_to_dir(config, profile, &output_dir)
}

/// Read every usable file of a filtered folder.
pub(crate) fn load_filtered(dir: &Path) -> Vec<RecordSet> {
    filtered_inputs(dir)
        .iter()
        .filter_map(|p| read_records(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovery_is_recursive_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::write(dir.path().join("b/nested/z.csv"), "x").unwrap();
        fs::write(dir.path().join("a.CSV"), "x").unwrap();
        fs::write(dir.path().join(".hidden.csv"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let found = discover_csv_files(dir.path());
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        let nested = Path::new("b").join("nested").join("z.csv");
        assert_eq!(names, vec!["a.CSV".to_string(), nested.to_string_lossy().to_string()]);
        assert!(discover_csv_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn combined_files_only_used_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2024_combined.csv"), "x").unwrap();
        assert_eq!(filtered_inputs(dir.path()).len(), 1);

        fs::write(dir.path().join("2024-01.csv"), "x").unwrap();
        let inputs = filtered_inputs(dir.path());
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].ends_with("2024-01.csv"));
    }

    #[test]
    fn month_filter_forms() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 14).unwrap();
        assert!(month_matches(None, d));
        assert!(month_matches(Some("02"), d));
        assert!(month_matches(Some("2024-02"), d));
        assert!(!month_matches(Some("2023-02"), d));
        assert!(!month_matches(Some("03"), d));
    }

    #[test]
    fn file_safe_labels() {
        assert_eq!(file_safe_label("TGP - 500"), "TGP_-_500");
        assert_eq!(file_safe_label("PG&E CITYGATE"), "PG&E_CITYGATE");
        assert_eq!(file_safe_label("A/B"), "A_B");
    }
}
