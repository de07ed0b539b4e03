//! Implied-volatility surfaces per curve, month and year.

use crate::config::{DateRange, PipelineConfig};
use crate::error::{Result, VolPipelineError};
use crate::models::record::columns;
use crate::models::{MoneynessTable, RecordSet, SurfaceMatrix, YearMonth};
use crate::pipeline::{file_safe_label, load_filtered, month_matches};
use crate::utils::dates::parse_date;
use crate::utils::plot_surface;
use crate::utils::polars_utils::{pivot_surface, SurfacePoint};
use chrono::Datelike;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The calendar span one surface covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfacePeriod {
    Month(YearMonth),
    Year(i32),
}

impl SurfacePeriod {
    pub fn title(&self, curve: &str) -> String {
        match self {
            SurfacePeriod::Month(ym) => format!("Volatility Surface - {} - {}", curve, ym),
            SurfacePeriod::Year(y) => format!("Yearly Volatility Surface - {} - {}", curve, y),
        }
    }

    pub fn matrix_file_name(&self, curve: &str) -> String {
        format!("{}_{}_data.csv", file_safe_label(curve), self)
    }

    pub fn image_file_name(&self, curve: &str) -> String {
        format!("{}_{}_surface.png", file_safe_label(curve), self)
    }
}

/// `YYYY-MM` for months, `YYYY_YEARLY` for years
impl fmt::Display for SurfacePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfacePeriod::Month(ym) => write!(f, "{}", ym),
            SurfacePeriod::Year(y) => write!(f, "{}_YEARLY", y),
        }
    }
}

/// One persisted surface.
#[derive(Debug, Clone)]
pub struct SurfaceArtifact {
    pub period: SurfacePeriod,
    pub matrix_path: PathBuf,
    /// `None` when the plot could not be rendered
    pub image_path: Option<PathBuf>,
    pub n_dates: usize,
    pub n_offsets: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceReport {
    pub files_read: usize,
    pub rows_used: usize,
    /// Rows of the target curve whose `Type` has no moneyness offset
    pub rows_unmapped: usize,
    pub surfaces: Vec<SurfaceArtifact>,
}

/// Surface observations of `curve` in one filtered file. The curve match is
/// exact. Rows with an unmapped `Type`, a bad date or a non-numeric `Mid`
/// are left out.
fn surface_points(
    set: &RecordSet,
    curve: &str,
    table: &MoneynessTable,
    report: &mut SurfaceReport,
) -> Vec<SurfacePoint> {
    let (Some(basis_idx), Some(type_idx), Some(mid_idx), Some(date_idx)) = (
        set.column_index(columns::BASIS),
        set.column_index(columns::TYPE),
        set.column_index(columns::MID),
        set.date_column(),
    ) else {
        warn!(
            "Skipping {}: needs Basis, Type, Mid and a date column",
            set.source.display()
        );
        return Vec::new();
    };

    let mut points = Vec::new();
    for row in &set.rows {
        if row[basis_idx].trim() != curve {
            continue;
        }
        let Some(moneyness) = table.lookup(&row[type_idx]) else {
            report.rows_unmapped += 1;
            continue;
        };
        let (Some(date), Ok(mid)) = (parse_date(&row[date_idx]), row[mid_idx].trim().parse::<f64>())
        else {
            continue;
        };
        if mid.is_finite() {
            points.push(SurfacePoint {
                date,
                moneyness,
                mid,
            });
        }
    }
    points
}

/// Pivot, persist and render one period. Empty pivots are skipped.
fn persist_surface(
    points: &[SurfacePoint],
    period: SurfacePeriod,
    curve: &str,
    output_dir: &Path,
) -> Result<Option<SurfaceArtifact>> {
    let matrix: SurfaceMatrix = pivot_surface(points)?.drop_empty_columns();
    if matrix.is_empty() {
        debug!("Empty pivot for {} {}, skipping", curve, period);
        return Ok(None);
    }

    let matrix_path = output_dir.join(period.matrix_file_name(curve));
    matrix.write_surface_csv(&matrix_path)?;

    let image_path = output_dir.join(period.image_file_name(curve));
    let image_path = match plot_surface(&matrix, &period.title(curve), &image_path) {
        Ok(()) => Some(image_path),
        Err(e) => {
            warn!("Could not render surface {}: {}", image_path.display(), e);
            None
        }
    };

    info!(
        "Saved surface {} ({} dates x {} offsets)",
        matrix_path.display(),
        matrix.n_rows(),
        matrix.columns.len()
    );

    Ok(Some(SurfaceArtifact {
        period,
        matrix_path,
        image_path,
        n_dates: matrix.n_rows(),
        n_offsets: matrix.columns.len(),
    }))
}

/// Build one surface per month and one per year for `curve` from a folder of
/// filtered files. `month` (`MM` or `YYYY-MM`) and `date_range` restrict the
/// rows used.
pub fn build_surfaces(
    input_dir: &Path,
    output_dir: &Path,
    curve: &str,
    month: Option<&str>,
    date_range: Option<DateRange>,
    table: &MoneynessTable,
) -> Result<SurfaceReport> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        VolPipelineError::Other(format!(
            "Cannot create output folder {}: {}",
            output_dir.display(),
            e
        ))
    })?;

    let mut report = SurfaceReport::default();
    let sets = load_filtered(input_dir);
    report.files_read = sets.len();
    if sets.is_empty() {
        warn!("No data loaded for surface generation from {}", input_dir.display());
        return Ok(report);
    }

    let mut by_month: BTreeMap<YearMonth, Vec<SurfacePoint>> = BTreeMap::new();
    let mut by_year: BTreeMap<i32, Vec<SurfacePoint>> = BTreeMap::new();

    for set in &sets {
        for point in surface_points(set, curve, table, &mut report) {
            if !date_range.map_or(true, |r| r.contains(point.date)) || !month_matches(month, point.date) {
                continue;
            }
            report.rows_used += 1;
            by_month.entry(YearMonth::from_date(point.date)).or_default().push(point);
            by_year.entry(point.date.year()).or_default().push(point);
        }
    }

    if report.rows_unmapped > 0 {
        debug!("{} rows had no moneyness mapping", report.rows_unmapped);
    }

    let periods = by_month
        .iter()
        .map(|(ym, points)| (SurfacePeriod::Month(*ym), points))
        .chain(by_year.iter().map(|(y, points)| (SurfacePeriod::Year(*y), points)));

    for (period, points) in periods {
        if let Some(artifact) = persist_surface(points, period, curve, output_dir)? {
            report.surfaces.push(artifact);
        }
    }

    info!(
        "Volatility surfaces saved: {} for {} in {}",
        report.surfaces.len(),
        curve,
        output_dir.display()
    );
    Ok(report)
}

/// Surface stage over the run's `filtered/` folder into `surfaces/`.
pub fn run_surface_stage(config: &PipelineConfig) -> Result<SurfaceReport> {
    build_surfaces(
        &config.filtered_dir(),
        &config.surfaces_dir(),
        &config.curve,
        config.month.as_deref(),
        config.date_range,
        &config.vocabulary.moneyness_table(),
    )
}
