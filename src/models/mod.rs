//! Data models for volatility exports
//!
//! This module contains the row-level records read from exports, the
//! moneyness lookup and the date-indexed matrices built from them.

pub mod matrix;
pub mod moneyness;
pub mod record;

pub use matrix::{DateMatrix, SeriesMatrix, SurfaceMatrix};
pub use moneyness::{MoneynessEntry, MoneynessTable};
pub use record::{NormalizedRowSet, RecordSet, VolRecord, YearMonth};
