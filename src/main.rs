//! Command-line runner for volcurve-rs
//!
//! Runs every stage for the curve and year taken from the environment:
//! 1. Filter raw exports for surface and EWMA/HIST data
//! 2. Build monthly and yearly volatility surfaces
//! 3. Build the EWMA time series, rolling mean and daily shocks

use volcurve_rs::config::PipelineConfig;
use volcurve_rs::error::Result;
use volcurve_rs::pipeline::{
    run_filter_stage, run_surface_stage, run_time_series_stage, ExtractionProfile,
};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config = PipelineConfig::from_env()?;
    config.init_logging()?;

    info!(
        "Starting volcurve for {} {} ({} -> {})",
        config.curve,
        config.year,
        config.input_dir.display(),
        config.output_dir.display()
    );

    for profile in [ExtractionProfile::Surface, ExtractionProfile::EwmaHist] {
        let report = run_filter_stage(&config, profile)?;
        info!(
            "{:?}: {} of {} files used, {} rows kept, {} monthly files",
            profile,
            report.files_processed,
            report.files_found,
            report.rows_kept,
            report.monthly_artifacts.len()
        );
        if report.rows_kept == 0 {
            warn!("No {:?} rows matched {} in {}", profile, config.curve, config.year);
        }
    }

    let surfaces = run_surface_stage(&config)?;
    info!(
        "Surfaces: {} written to {}",
        surfaces.surfaces.len(),
        config.surfaces_dir().display()
    );

    let series = run_time_series_stage(&config, &config.ewma_dir())?;
    match &series.workbook {
        Some(path) => info!(
            "Time series: {} and {} charts in {}",
            path.display(),
            series.images.len(),
            config.time_series_dir().display()
        ),
        None => warn!("No time series produced for {}", config.curve),
    }

    info!("Run completed");

    Ok(())
}
