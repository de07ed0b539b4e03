//! # volcurve-rs
//!
//! Batch processing of daily commodity option-volatility CSV exports into
//! implied-volatility surfaces and smoothed volatility time series.
//!
//! ## Features
//!
//! - Tolerant CSV loading (encoding fallbacks, header sanitation, malformed-row skipping)
//! - Curve/type/date filtering into monthly and yearly combined files
//! - Date x moneyness surface matrices per month and per year, rendered in 3-D
//! - Rolling-mean and daily-change time series exported to a workbook and line charts
//! - Environment-based configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use volcurve_rs::config::PipelineConfig;
//! use volcurve_rs::pipeline::{run_filter_stage, run_surface_stage, run_time_series_stage, ExtractionProfile};
//!
//! fn main() -> volcurve_rs::error::Result<()> {
//!     let config = PipelineConfig::new("exports", "out", "NYMEX", "2024")
//!         .with_rolling_window(21);
//!     config.validate()?;
//!
//!     // Filter raw exports into out/filtered and out/ewma
//!     run_filter_stage(&config, ExtractionProfile::Surface)?;
//!     run_filter_stage(&config, ExtractionProfile::EwmaHist)?;
//!
//!     // Surfaces into out/surfaces, time series into out/time_series
//!     let surfaces = run_surface_stage(&config)?;
//!     let series = run_time_series_stage(&config, &config.ewma_dir())?;
//!
//!     println!("{} surfaces, workbook: {:?}", surfaces.surfaces.len(), series.workbook);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types
pub use config::{DateRange, PipelineConfig, Vocabulary};
pub use error::{Result, VolPipelineError};
pub use pipeline::ExtractionProfile;
