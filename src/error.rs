use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the volcurve-rs library
#[derive(Error, Debug)]
pub enum VolPipelineError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing required columns {columns:?} in {path}")]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    #[error("Plot error: {0}")]
    PlotError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::prelude::PolarsError),

    #[error("Workbook error: {0}")]
    WorkbookError(#[from] rust_xlsxwriter::XlsxError),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VolPipelineError>;
