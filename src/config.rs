use crate::error::{Result, VolPipelineError};
use crate::models::moneyness::{MoneynessEntry, MoneynessTable};
use crate::utils::dates::parse_date;
use chrono::{Datelike, NaiveDate};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_ROLLING_WINDOW: usize = 21;

const DEFAULT_CURVES: [&str; 26] = [
    "NYMEX",
    "HSC",
    "TGP - 500",
    "TRANSCO 65",
    "FGT - Z3",
    "CG MAINLINE",
    "NGPL - TxOk",
    "NGPL - MIDCON",
    "PEPL",
    "VENTURA",
    "DEMARC",
    "CHICAGO",
    "MICHCON",
    "DOMINION",
    "TCO",
    "TETCO - M3",
    "TRANSCO Z6",
    "ALGONQUIN",
    "EP PERMIAN",
    "EP SAN JUAN",
    "WAHA",
    "ROCKIES",
    "CIG",
    "PG&E CITYGATE",
    "SOCAL",
    "AECO",
];

const DEFAULT_MONEYNESS: [(&str, f64); 13] = [
    ("ATM - $1.00", -1.00),
    ("ATM - $0.75", -0.75),
    ("ATM - $0.50", -0.50),
    ("ATM - $0.25", -0.25),
    ("ATM", 0.00),
    ("ATM + $0.25", 0.25),
    ("ATM + $0.50", 0.50),
    ("ATM + $0.75", 0.75),
    ("ATM + $1.00", 1.00),
    ("ATM + $1.25", 1.25),
    ("ATM + $1.50", 1.50),
    ("ATM + $1.75", 1.75),
    ("ATM + $2.00", 2.00),
];

const DEFAULT_SURFACE_TYPES: [&str; 8] = [
    "ATM - $1.00",
    "ATM - $0.75",
    "ATM - $0.50",
    "ATM - $0.25",
    "ATM",
    "ATM + $0.25",
    "ATM + $0.50",
    "ATM + $0.75",
];

/// Curve names and strike labels the pipeline understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Known curve names
    pub curves: Vec<String>,
    /// Strike label to moneyness offset
    pub moneyness: Vec<MoneynessEntry>,
    /// Strike labels kept when extracting surface data
    pub surface_types: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            curves: DEFAULT_CURVES.iter().map(|c| c.to_string()).collect(),
            moneyness: DEFAULT_MONEYNESS
                .iter()
                .map(|(label, offset)| MoneynessEntry::new(*label, *offset))
                .collect(),
            surface_types: DEFAULT_SURFACE_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Vocabulary {
    /// Load a vocabulary override from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let vocabulary = serde_json::from_str(&text)?;
        Ok(vocabulary)
    }

    pub fn moneyness_table(&self) -> MoneynessTable {
        MoneynessTable::new(&self.moneyness)
    }

    pub fn knows_curve(&self, curve: &str) -> bool {
        self.curves.iter().any(|c| c.eq_ignore_ascii_case(curve.trim()))
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(VolPipelineError::ConfigError(format!(
                "Date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start_date = parse_date(start)
            .ok_or_else(|| VolPipelineError::ParseError(format!("Invalid start date: {}", start)))?;
        let end_date = parse_date(end)
            .ok_or_else(|| VolPipelineError::ParseError(format!("Invalid end date: {}", end)))?;
        Self::new(start_date, end_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Configuration for one pipeline run.
///
/// Stages receive this explicitly; nothing is kept in process-wide state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Folder holding the raw vendor exports
    pub input_dir: PathBuf,
    /// Root folder for every artifact of this run
    pub output_dir: PathBuf,
    /// Target curve (Basis)
    pub curve: String,
    /// Four-digit year
    pub year: String,
    /// Optional two-digit month
    pub month: Option<String>,
    /// Optional explicit range, takes precedence over `year` when filtering
    pub date_range: Option<DateRange>,
    /// Trailing window for time-series smoothing
    pub rolling_window: usize,
    /// Record types to keep; empty keeps all
    pub record_types: Vec<String>,
    /// Call/Put value to keep
    pub call_put: Option<String>,
    /// Log level
    pub log_level: String,
    pub vocabulary: Vocabulary,
}

impl PipelineConfig {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        curve: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            curve: curve.into(),
            year: year.into(),
            month: None,
            date_range: None,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            record_types: Vec::new(),
            call_put: None,
            log_level: "info".to_string(),
            vocabulary: Vocabulary::default(),
        }
    }

    pub fn with_month(mut self, month: impl Into<String>) -> Self {
        self.month = Some(month.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_rolling_window(mut self, window: usize) -> Self {
        self.rolling_window = window;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let default_curve = "NYMEX".to_string();
        let default_year = chrono::Utc::now().year().to_string();
        let default_log_level = "info".to_string();

        let input_dir = env::var("VOL_INPUT_DIR").map_err(|_| {
            VolPipelineError::ConfigError("VOL_INPUT_DIR environment variable not set".to_string())
        })?;

        let output_dir = env::var("VOL_OUTPUT_DIR").map_err(|_| {
            VolPipelineError::ConfigError("VOL_OUTPUT_DIR environment variable not set".to_string())
        })?;

        let curve = env::var("VOL_CURVE").unwrap_or(default_curve);
        let year = env::var("VOL_YEAR").unwrap_or(default_year);
        let month = env::var("VOL_MONTH").ok().filter(|m| !m.trim().is_empty());
        let log_level = env::var("LOG_LEVEL").unwrap_or(default_log_level);

        let date_range = match (env::var("VOL_START_DATE"), env::var("VOL_END_DATE")) {
            (Ok(start), Ok(end)) => Some(DateRange::parse(&start, &end)?),
            _ => None,
        };

        let rolling_window = match env::var("VOL_ROLLING_WINDOW") {
            Ok(v) => v.trim().parse().map_err(|_| {
                VolPipelineError::ConfigError(format!("Invalid VOL_ROLLING_WINDOW: {}", v))
            })?,
            Err(_) => DEFAULT_ROLLING_WINDOW,
        };

        let vocabulary = match env::var("VOL_VOCABULARY") {
            Ok(path) => Vocabulary::from_json_file(path)?,
            Err(_) => Vocabulary::default(),
        };

        let config = PipelineConfig {
            input_dir: PathBuf::from(input_dir),
            output_dir: PathBuf::from(output_dir),
            curve,
            year,
            month,
            date_range,
            rolling_window,
            record_types: Vec::new(),
            call_put: None,
            log_level,
            vocabulary,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the run parameters before any stage touches the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.year.len() != 4 || !self.year.chars().all(|c| c.is_ascii_digit()) {
            return Err(VolPipelineError::ConfigError(format!(
                "Year must be a 4-digit string, got {:?}",
                self.year
            )));
        }

        if let Some(month) = &self.month {
            let valid = month.len() == 2
                && month
                    .parse::<u32>()
                    .map(|m| (1..=12).contains(&m))
                    .unwrap_or(false);
            if !valid {
                return Err(VolPipelineError::ConfigError(format!(
                    "Month must be a 2-digit string between 01 and 12, got {:?}",
                    month
                )));
            }
        }

        if self.rolling_window == 0 {
            return Err(VolPipelineError::ConfigError(
                "Rolling window must be a positive integer".to_string(),
            ));
        }

        if let Some(range) = &self.date_range {
            if range.start > range.end {
                return Err(VolPipelineError::ConfigError(format!(
                    "Date range start {} is after end {}",
                    range.start, range.end
                )));
            }
        }

        if !self.vocabulary.knows_curve(&self.curve) {
            warn!("Curve {:?} is not in the configured curve list", self.curve);
        }

        Ok(())
    }

    pub fn filtered_dir(&self) -> PathBuf {
        self.output_dir.join("filtered")
    }

    pub fn ewma_dir(&self) -> PathBuf {
        self.output_dir.join("ewma")
    }

    pub fn surfaces_dir(&self) -> PathBuf {
        self.output_dir.join("surfaces")
    }

    pub fn time_series_dir(&self) -> PathBuf {
        self.output_dir.join("time_series")
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| VolPipelineError::ConfigError(format!("Failed to init logging: {}", e)))?;

        Ok(())
    }
}
