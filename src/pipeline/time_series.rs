//! Rolling-smoothed volatility time series and daily shocks.
//!
//! Filtered files come in two shapes. Surface-style files carry a
//! `Contract_Month` column and pivot to one series per contract month;
//! EWMA-style files collapse to a single `EWMA_Volatility` series. The shape
//! is decided once when the files are loaded and then drives both the pivot
//! and the charts.

use crate::config::{DateRange, PipelineConfig};
use crate::error::{Result, VolPipelineError};
use crate::models::record::columns;
use crate::models::{RecordSet, SeriesMatrix};
use crate::pipeline::{file_safe_label, load_filtered, month_matches};
use crate::utils::dates::parse_date;
use crate::utils::polars_utils::{pivot_series, SeriesPoint};
use crate::utils::{
    plot_daily_change_in_memory, plot_series_with_rolling_in_memory, write_series_workbook,
    RenderedImage,
};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAX_MIN_PERIODS: usize = 10;

/// Layout of the loaded filtered files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSchema {
    /// One series per `Contract_Month`
    Surface,
    /// A single daily-mean series
    Ewma,
}

impl SourceSchema {
    pub const EWMA_COLUMN: &'static str = "EWMA_Volatility";

    /// Surface-style when any file has a `Contract_Month` column.
    pub fn detect(sets: &[RecordSet]) -> Self {
        if sets.iter().any(|s| s.has_column(columns::CONTRACT_MONTH)) {
            SourceSchema::Surface
        } else {
            SourceSchema::Ewma
        }
    }

    fn series_label(&self, row: &SeriesRow) -> Option<String> {
        match self {
            SourceSchema::Surface => row.contract.clone(),
            SourceSchema::Ewma => Some(Self::EWMA_COLUMN.to_string()),
        }
    }

    fn pivot(&self, rows: &[SeriesRow]) -> Result<SeriesMatrix> {
        let points: Vec<SeriesPoint> = rows
            .iter()
            .filter_map(|row| {
                self.series_label(row).map(|label| SeriesPoint {
                    date: row.date,
                    label,
                    mid: row.mid,
                })
            })
            .collect();
        pivot_series(&points)
    }
}

/// Inputs of one time-series build.
#[derive(Debug, Clone)]
pub struct TimeSeriesRequest {
    pub input_dir: PathBuf,
    /// Folder searched for surface images named after a contract month
    pub surface_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub curve: String,
    /// `MM` or `YYYY-MM`; also used as the period label
    pub month: Option<String>,
    pub rolling_window: usize,
    pub date_range: Option<DateRange>,
}

impl TimeSeriesRequest {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, curve: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            surface_dir: None,
            output_dir: output_dir.into(),
            curve: curve.into(),
            month: None,
            rolling_window: crate::config::DEFAULT_ROLLING_WINDOW,
            date_range: None,
        }
    }

    pub fn from_config(config: &PipelineConfig, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            surface_dir: Some(config.surfaces_dir()),
            output_dir: config.time_series_dir(),
            curve: config.curve.clone(),
            month: config.month.clone(),
            rolling_window: config.rolling_window,
            date_range: config.date_range,
        }
    }

    pub fn with_surface_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.surface_dir = Some(dir.into());
        self
    }

    pub fn with_month(mut self, month: impl Into<String>) -> Self {
        self.month = Some(month.into());
        self
    }

    pub fn with_rolling_window(mut self, window: usize) -> Self {
        self.rolling_window = window;
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// The month when given, otherwise `{curve}_combined`.
    pub fn period_label(&self) -> String {
        match &self.month {
            Some(m) => file_safe_label(m),
            None => format!("{}_combined", file_safe_label(&self.curve)),
        }
    }
}

/// The three aligned matrices of one build.
#[derive(Debug, Clone)]
pub struct TimeSeriesSet {
    pub original: SeriesMatrix,
    pub rolling: SeriesMatrix,
    pub daily_change: SeriesMatrix,
}

impl TimeSeriesSet {
    /// Trailing mean with `min(window, rows, 10)` minimum periods, then its
    /// first difference.
    pub fn from_original(original: SeriesMatrix, window: usize) -> Self {
        let min_periods = window.min(original.n_rows()).min(MAX_MIN_PERIODS);
        let rolling = original.rolling_mean(window, min_periods);
        let daily_change = rolling.diff();
        Self {
            original,
            rolling,
            daily_change,
        }
    }

    /// Workbook sheets in output order: `Original_TS`, `Rolling_{window}D`,
    /// `Daily_Change`.
    pub fn sheets(&self, window: usize) -> [(String, &SeriesMatrix); 3] {
        [
            ("Original_TS".to_string(), &self.original),
            (format!("Rolling_{}D", window), &self.rolling),
            ("Daily_Change".to_string(), &self.daily_change),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeSeriesReport {
    pub files_read: usize,
    pub rows_used: usize,
    pub schema: Option<SourceSchema>,
    pub columns: Vec<String>,
    pub workbook: Option<PathBuf>,
    pub images: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct SeriesRow {
    date: NaiveDate,
    basis: Option<String>,
    contract: Option<String>,
    mid: f64,
}

/// Usable rows of one file: numeric `Mid`, a parsable date, the target curve
/// when a `Basis` column exists, inside the range and month.
fn series_rows(set: &RecordSet, request: &TimeSeriesRequest) -> Vec<SeriesRow> {
    let (Some(mid_idx), Some(date_idx)) = (set.column_index(columns::MID), set.date_column()) else {
        warn!("Skipping {}: needs Mid and a date column", set.source.display());
        return Vec::new();
    };
    let basis_idx = set.column_index(columns::BASIS);
    let contract_idx = set.column_index(columns::CONTRACT_MONTH);

    let mut rows = Vec::new();
    for row in &set.rows {
        let basis = basis_idx.map(|i| row[i].trim().to_string());
        if let Some(b) = &basis {
            if !b.eq_ignore_ascii_case(request.curve.trim()) {
                continue;
            }
        }
        let Some(date) = parse_date(&row[date_idx]) else {
            continue;
        };
        if !request.date_range.map_or(true, |r| r.contains(date))
            || !month_matches(request.month.as_deref(), date)
        {
            continue;
        }
        let mid = match row[mid_idx].trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => continue,
        };
        let contract = contract_idx
            .map(|i| row[i].trim().to_string())
            .filter(|c| !c.is_empty());
        rows.push(SeriesRow {
            date,
            basis,
            contract,
            mid,
        });
    }
    rows
}

/// Whether `dir` holds a PNG named after `label`.
fn surface_image_exists(dir: &Path, label: &str) -> bool {
    let needle = format!("_{}_", label);
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                let path = entry.path();
                let is_png = path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("png"))
                    .unwrap_or(false);
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                is_png && (stem == label || stem.contains(&needle))
            })
        })
        .unwrap_or(false)
}

fn save_rendered(rendered: Result<RenderedImage>, path: PathBuf, report: &mut TimeSeriesReport) {
    match rendered.and_then(|img| img.save_png(&path)) {
        Ok(()) => report.images.push(path),
        Err(e) => warn!("Could not render {}: {}", path.display(), e),
    }
}

fn render_charts(
    schema: SourceSchema,
    set: &TimeSeriesSet,
    request: &TimeSeriesRequest,
    prefix: &str,
    period: &str,
    report: &mut TimeSeriesReport,
) {
    let window = request.rolling_window;
    match schema {
        SourceSchema::Ewma => {
            let title = format!("EWMA Volatility - {} ({}-day smoothing)", period, window);
            save_rendered(
                plot_series_with_rolling_in_memory(
                    &set.original,
                    &set.rolling,
                    &set.daily_change,
                    0,
                    window,
                    &title,
                    None,
                ),
                request
                    .output_dir
                    .join(format!("{}_{}_timeseries_rolling.png", prefix, period)),
                report,
            );
            save_rendered(
                plot_daily_change_in_memory(
                    &set.daily_change,
                    0,
                    &format!("Daily Volatility Shocks - {}", period),
                ),
                request.output_dir.join(format!("{}_{}_dailychange.png", prefix, period)),
                report,
            );
        }
        SourceSchema::Surface => {
            for (j, contract) in set.original.columns.iter().enumerate() {
                let found = request
                    .surface_dir
                    .as_deref()
                    .map(|dir| surface_image_exists(dir, contract))
                    .unwrap_or(false);
                let annotation = if found {
                    format!("Vol Comparison for {} (surface image found)", contract)
                } else {
                    format!("Vol Comparison for {} (no surface image)", contract)
                };
                let safe_contract = file_safe_label(contract);
                save_rendered(
                    plot_series_with_rolling_in_memory(
                        &set.original,
                        &set.rolling,
                        &set.daily_change,
                        j,
                        window,
                        &format!("{} - {} ({}-day smoothing)", contract, period, window),
                        Some(annotation.as_str()),
                    ),
                    request.output_dir.join(format!(
                        "{}_{}_{}_timeseries_rolling.png",
                        prefix, period, safe_contract
                    )),
                    report,
                );
                save_rendered(
                    plot_daily_change_in_memory(
                        &set.daily_change,
                        j,
                        &format!("Daily Volatility Shocks - {}", contract),
                    ),
                    request.output_dir.join(format!(
                        "{}_{}_{}_dailychange.png",
                        prefix, period, safe_contract
                    )),
                    report,
                );
            }
        }
    }
}

/// Build the original, rolling and daily-change matrices from a folder of
/// filtered files, persist them as one workbook and render the charts.
///
/// A folder with no usable rows is logged and yields an empty report.
pub fn build_time_series(request: &TimeSeriesRequest) -> Result<TimeSeriesReport> {
    if request.rolling_window == 0 {
        return Err(VolPipelineError::ConfigError(
            "Rolling window must be a positive integer".to_string(),
        ));
    }
    std::fs::create_dir_all(&request.output_dir).map_err(|e| {
        VolPipelineError::Other(format!(
            "Cannot create output folder {}: {}",
            request.output_dir.display(),
            e
        ))
    })?;

    let mut report = TimeSeriesReport::default();
    let sets = load_filtered(&request.input_dir);
    report.files_read = sets.len();

    let schema = SourceSchema::detect(&sets);
    let mut rows: Vec<SeriesRow> = sets.iter().flat_map(|s| series_rows(s, request)).collect();
    if rows.is_empty() {
        warn!("No valid data found to process in {}", request.input_dir.display());
        return Ok(report);
    }
    rows.sort_by_key(|r| r.date);

    let original = schema.pivot(&rows)?;
    if original.is_empty() {
        warn!("No {:?} series could be formed from {}", schema, request.input_dir.display());
        return Ok(report);
    }
    report.rows_used = rows.len();
    report.schema = Some(schema);
    report.columns = original.columns.clone();

    let set = TimeSeriesSet::from_original(original, request.rolling_window);
    info!(
        "Applied {}-day rolling window to {} data points ({:?} schema, {} series)",
        request.rolling_window,
        set.original.n_rows(),
        schema,
        set.original.columns.len()
    );
    if let (Some((lo, hi)), Some((rlo, rhi))) = (set.original.value_range(), set.rolling.value_range()) {
        debug!("Original range {:.4} to {:.4}, rolling range {:.4} to {:.4}", lo, hi, rlo, rhi);
    }

    let prefix = rows
        .first()
        .and_then(|r| r.basis.clone())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| request.curve.clone());
    let prefix = file_safe_label(&prefix);
    let period = request.period_label();

    let workbook_path = request
        .output_dir
        .join(format!("{}_{}_time_series.xlsx", prefix, period));
    write_series_workbook(&set.sheets(request.rolling_window), &workbook_path)?;
    report.workbook = Some(workbook_path);

    render_charts(schema, &set, request, &prefix, &period, &mut report);

    info!(
        "Time series processing complete for {} - {} images for {}",
        request.curve,
        report.images.len(),
        period
    );
    Ok(report)
}

/// Time-series stage over `input_dir` into the run's `time_series/` folder.
pub fn run_time_series_stage(config: &PipelineConfig, input_dir: &Path) -> Result<TimeSeriesReport> {
    build_time_series(&TimeSeriesRequest::from_config(config, input_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    fn ewma_file(days: u32, mid: impl Fn(u32) -> f64) -> String {
        let mut body = String::from("Basis,Type,Call/Put,Curve_Date,Mid,year,month,date\n");
        for d in 1..=days {
            body.push_str(&format!(
                "NYMEX,HIST,EWMA,2024-01-{:02},{},2024,01,2024-01-{:02}\n",
                d,
                mid(d),
                d
            ));
        }
        body
    }

    #[test]
    fn schema_follows_contract_month_column() {
        let plain = RecordSet::new("a.csv", vec!["Mid".into()], vec![vec!["1".into()]]);
        let surface = RecordSet::new(
            "b.csv",
            vec!["Mid".into(), "Contract_Month".into()],
            vec![vec!["1".into(), "FEB24".into()]],
        );
        assert_eq!(SourceSchema::detect(&[plain.clone()]), SourceSchema::Ewma);
        assert_eq!(SourceSchema::detect(&[plain, surface]), SourceSchema::Surface);
    }

    #[test]
    fn min_periods_shrink_for_short_series() {
        let dates: Vec<NaiveDate> = (1..=4).map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap()).collect();
        let original = SeriesMatrix::new(
            dates,
            vec![SourceSchema::EWMA_COLUMN.to_string()],
            ndarray::array![[1.0], [2.0], [3.0], [4.0]],
        )
        .unwrap();
        let set = TimeSeriesSet::from_original(original, 21);
        assert!(set.rolling.get(2, 0).is_nan());
        assert_abs_diff_eq!(set.rolling.get(3, 0), 2.5);
        assert!(set.daily_change.get(3, 0).is_nan());
    }

    #[test]
    fn ewma_workbook_and_charts_are_named_after_curve_and_period() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write(input.path(), "NYMEX_2024-01_ewma_hist.csv", &ewma_file(25, |_| 0.35));

        let request = TimeSeriesRequest::new(input.path(), output.path(), "NYMEX");
        let report = build_time_series(&request).unwrap();

        assert_eq!(report.schema, Some(SourceSchema::Ewma));
        assert_eq!(report.columns, vec!["EWMA_Volatility"]);
        assert_eq!(report.rows_used, 25);
        let workbook = report.workbook.unwrap();
        assert_eq!(
            workbook.file_name().unwrap().to_string_lossy(),
            "NYMEX_NYMEX_combined_time_series.xlsx"
        );
        assert!(workbook.exists());
        assert_eq!(
            file_names(&report.images),
            vec![
                "NYMEX_NYMEX_combined_timeseries_rolling.png",
                "NYMEX_NYMEX_combined_dailychange.png"
            ]
        );
        for image in &report.images {
            assert!(image.exists());
        }
    }

    #[test]
    fn date_range_limits_the_rows_used() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write(input.path(), "NYMEX_2024-01_ewma_hist.csv", &ewma_file(20, |d| 0.30 + d as f64 / 100.0));

        let range = DateRange::parse("2024-01-05", "2024-01-09").unwrap();
        let request = TimeSeriesRequest::new(input.path(), output.path(), "NYMEX")
            .with_rolling_window(3)
            .with_date_range(range);
        let report = build_time_series(&request).unwrap();

        assert_eq!(report.rows_used, 5);
        assert!(report.workbook.unwrap().exists());
    }

    #[test]
    fn sheets_are_named_after_the_window() {
        let dates: Vec<NaiveDate> = (1..=3).map(|d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap()).collect();
        let original = SeriesMatrix::new(
            dates,
            vec![SourceSchema::EWMA_COLUMN.to_string()],
            ndarray::array![[0.3], [0.4], [0.5]],
        )
        .unwrap();
        let set = TimeSeriesSet::from_original(original, 21);
        let names: Vec<String> = set.sheets(21).iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["Original_TS", "Rolling_21D", "Daily_Change"]);
        assert_eq!(set.sheets(5)[1].0, "Rolling_5D");
        assert!(std::ptr::eq(set.sheets(21)[2].1, &set.daily_change));
    }

    #[test]
    fn surface_schema_pivots_contract_months_and_drops_other_curves() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write(
            input.path(),
            "2024-01.csv",
            "Basis,Type,Curve_Date,Mid,Contract_Month,date\n\
             NYMEX,ATM,2024-01-02,0.40,FEB24,2024-01-02\n\
             NYMEX,ATM,2024-01-02,0.50,MAR24,2024-01-02\n\
             NYMEX,ATM,2024-01-03,0.42,FEB24,2024-01-03\n\
             NYMEX,ATM,2024-01-03,n/a,MAR24,2024-01-03\n\
             HSC,ATM,2024-01-03,9.0,FEB24,2024-01-03\n",
        );

        let request = TimeSeriesRequest::new(input.path(), output.path(), "NYMEX")
            .with_month("01")
            .with_rolling_window(2);
        let report = build_time_series(&request).unwrap();

        assert_eq!(report.schema, Some(SourceSchema::Surface));
        assert_eq!(report.columns, vec!["FEB24", "MAR24"]);
        assert_eq!(report.rows_used, 3);
        assert_eq!(
            report.workbook.unwrap().file_name().unwrap().to_string_lossy(),
            "NYMEX_01_time_series.xlsx"
        );
        assert_eq!(
            file_names(&report.images),
            vec![
                "NYMEX_01_FEB24_timeseries_rolling.png",
                "NYMEX_01_FEB24_dailychange.png",
                "NYMEX_01_MAR24_timeseries_rolling.png",
                "NYMEX_01_MAR24_dailychange.png"
            ]
        );
    }

    #[test]
    fn empty_input_is_a_quiet_success() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let report = build_time_series(&TimeSeriesRequest::new(input.path(), output.path(), "NYMEX")).unwrap();
        assert!(report.workbook.is_none());
        assert!(report.images.is_empty());
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 0);
    }

    #[test]
    fn annotation_lookup_by_label() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("NYMEX_FEB24_surface.png"), b"png").unwrap();
        fs::write(dir.path().join("MAR24.png"), b"png").unwrap();
        assert!(surface_image_exists(dir.path(), "FEB24"));
        assert!(surface_image_exists(dir.path(), "MAR24"));
        assert!(!surface_image_exists(dir.path(), "APR24"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = TimeSeriesRequest::new(dir.path(), dir.path(), "NYMEX").with_rolling_window(0);
        assert!(matches!(build_time_series(&request), Err(VolPipelineError::ConfigError(_))));
    }
}
