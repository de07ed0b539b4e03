//! Date-indexed matrices produced by the surface and time-series builders.
//!
//! Undefined cells are stored as `NaN`.

use crate::error::{Result, VolPipelineError};
use chrono::NaiveDate;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A (date x column) matrix of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMatrix<C> {
    /// Row index, ascending
    pub dates: Vec<NaiveDate>,
    /// Column labels
    pub columns: Vec<C>,
    /// Values (2D array: dates x columns)
    pub values: Array2<f64>,
}

/// Surface matrix: columns are moneyness offsets.
pub type SurfaceMatrix = DateMatrix<f64>;

/// Time-series matrix: columns are contract-month labels or `EWMA_Volatility`.
pub type SeriesMatrix = DateMatrix<String>;

impl<C: Clone> DateMatrix<C> {
    pub fn new(dates: Vec<NaiveDate>, columns: Vec<C>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (dates.len(), columns.len()) {
            return Err(VolPipelineError::Other(format!(
                "Matrix shape {:?} does not match {} dates x {} columns",
                values.dim(),
                dates.len(),
                columns.len()
            )));
        }
        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[[row, col]]
    }

    /// Remove columns in which every cell is undefined.
    pub fn drop_empty_columns(&self) -> Self {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&j| self.values.column(j).iter().any(|v| !v.is_nan()))
            .collect();
        Self {
            dates: self.dates.clone(),
            columns: keep.iter().map(|&j| self.columns[j].clone()).collect(),
            values: self.values.select(Axis(1), &keep),
        }
    }

    /// Trailing mean over `window` rows per column. A row is defined once the
    /// window holds at least `min_periods` defined observations.
    pub fn rolling_mean(&self, window: usize, min_periods: usize) -> Self {
        let window = window.max(1);
        let min_periods = min_periods.max(1);
        let (n_rows, n_cols) = self.values.dim();
        let mut out = Array2::from_elem((n_rows, n_cols), f64::NAN);

        for j in 0..n_cols {
            let col = self.values.column(j);
            for i in 0..n_rows {
                let start = (i + 1).saturating_sub(window);
                let (sum, count) = col
                    .slice(ndarray::s![start..=i])
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
                if count >= min_periods {
                    out[[i, j]] = sum / count as f64;
                }
            }
        }

        Self {
            dates: self.dates.clone(),
            columns: self.columns.clone(),
            values: out,
        }
    }

    /// Row-over-row difference; the first row and any row whose predecessor
    /// is undefined come out undefined.
    pub fn diff(&self) -> Self {
        let (n_rows, n_cols) = self.values.dim();
        let mut out = Array2::from_elem((n_rows, n_cols), f64::NAN);
        for i in 1..n_rows {
            for j in 0..n_cols {
                out[[i, j]] = self.values[[i, j]] - self.values[[i - 1, j]];
            }
        }
        Self {
            dates: self.dates.clone(),
            columns: self.columns.clone(),
            values: out,
        }
    }

    /// Defined `(date, value)` points of one column, in date order.
    pub fn points(&self, col: usize) -> Vec<(NaiveDate, f64)> {
        self.dates
            .iter()
            .zip(self.values.column(col).iter())
            .filter(|(_, v)| !v.is_nan())
            .map(|(d, v)| (*d, *v))
            .collect()
    }

    /// Min and max over defined cells, `None` when nothing is defined.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

impl<C: Clone> DateMatrix<C> {
    /// Write the matrix as a flat file: a `date` column followed by one
    /// column per label; undefined cells are empty.
    pub fn write_csv<P, F>(&self, path: P, label: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: Fn(&C) -> String,
    {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("date".to_string());
        header.extend(self.columns.iter().map(&label));
        writer.write_record(&header)?;

        for (i, date) in self.dates.iter().enumerate() {
            let mut row = Vec::with_capacity(self.columns.len() + 1);
            row.push(date.format("%Y-%m-%d").to_string());
            row.extend(self.values.row(i).iter().map(|v| format_cell(*v)));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SurfaceMatrix {
    pub fn write_surface_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_csv(path, |m| format_offset(*m))
    }
}

/// Offsets keep one decimal place when they are whole numbers: `-1.0`, `0.0`, `0.25`.
pub fn format_offset(offset: f64) -> String {
    if offset.fract() == 0.0 {
        format!("{:.1}", offset)
    } else {
        offset.to_string()
    }
}

pub fn format_cell(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn rolling_of_constant_is_constant_and_diff_is_zero() {
        let n = 30;
        let m = SeriesMatrix::new(
            dates(n),
            vec!["EWMA_Volatility".to_string()],
            Array2::from_elem((n, 1), 0.35),
        )
        .unwrap();
        let rolling = m.rolling_mean(21, 10);
        let change = rolling.diff();

        for i in 0..n {
            let r = rolling.get(i, 0);
            if i < 9 {
                assert!(r.is_nan());
            } else {
                assert_abs_diff_eq!(r, 0.35, epsilon = 1e-12);
            }
            let d = change.get(i, 0);
            if !d.is_nan() {
                assert_abs_diff_eq!(d, 0.0, epsilon = 1e-12);
            }
        }
        assert!(change.get(9, 0).is_nan());
        assert!(!change.get(10, 0).is_nan());
    }

    #[test]
    fn rolling_uses_trailing_window_and_skips_undefined() {
        let m = SeriesMatrix::new(
            dates(5),
            vec!["a".to_string()],
            array![[1.0], [2.0], [f64::NAN], [4.0], [5.0]],
        )
        .unwrap();
        let r = m.rolling_mean(2, 1);
        assert_abs_diff_eq!(r.get(0, 0), 1.0);
        assert_abs_diff_eq!(r.get(1, 0), 1.5);
        assert_abs_diff_eq!(r.get(2, 0), 2.0);
        assert_abs_diff_eq!(r.get(3, 0), 4.0);
        assert_abs_diff_eq!(r.get(4, 0), 4.5);

        let d = r.diff();
        assert!(d.get(0, 0).is_nan());
        assert_abs_diff_eq!(d.get(1, 0), 0.5);
        assert_abs_diff_eq!(d.get(4, 0), 0.5);
    }

    #[test]
    fn derived_matrices_share_index_and_columns() {
        let m = SeriesMatrix::new(
            dates(3),
            vec!["JAN25".to_string(), "FEB25".to_string()],
            array![[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]],
        )
        .unwrap();
        let r = m.rolling_mean(2, 2);
        let d = r.diff();
        assert_eq!(r.dates, m.dates);
        assert_eq!(d.dates, m.dates);
        assert_eq!(r.columns, m.columns);
        assert_eq!(d.columns, m.columns);
        assert_eq!(d.values.dim(), m.values.dim());
    }

    #[test]
    fn drops_all_undefined_columns() {
        let m = SurfaceMatrix::new(
            dates(2),
            vec![-0.5, 0.0, 0.25],
            array![[0.3, f64::NAN, 0.2], [0.31, f64::NAN, f64::NAN]],
        )
        .unwrap();
        let cleaned = m.drop_empty_columns();
        assert_eq!(cleaned.columns, vec![-0.5, 0.25]);
        assert_eq!(cleaned.values.dim(), (2, 2));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        assert!(SurfaceMatrix::new(dates(2), vec![0.0], Array2::zeros((3, 1))).is_err());
    }

    #[test]
    fn offsets_format_like_float_labels() {
        assert_eq!(format_offset(-1.0), "-1.0");
        assert_eq!(format_offset(0.0), "0.0");
        assert_eq!(format_offset(0.25), "0.25");
        assert_eq!(format_offset(-0.75), "-0.75");
        assert_eq!(format_cell(f64::NAN), "");
        assert_eq!(format_cell(0.22), "0.22");
    }
}
