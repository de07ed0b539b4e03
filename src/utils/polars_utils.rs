use crate::error::Result;
use crate::models::{SeriesMatrix, SurfaceMatrix};
use crate::utils::dates::{date_ordinal, from_ordinal};
use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeMap;

/// One `Mid` observation at a (date, moneyness) coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub date: NaiveDate,
    pub moneyness: f64,
    pub mid: f64,
}

/// One `Mid` observation for a labelled series on a date
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub label: String,
    pub mid: f64,
}

/// Convert surface observations to a Polars DataFrame
pub fn surface_points_to_dataframe(points: &[SurfacePoint]) -> Result<DataFrame> {
    let mut dates = Vec::with_capacity(points.len());
    let mut moneyness = Vec::with_capacity(points.len());
    let mut mids = Vec::with_capacity(points.len());

    for p in points {
        dates.push(date_ordinal(p.date));
        moneyness.push(p.moneyness);
        mids.push(p.mid);
    }

    let df = DataFrame::new(vec![
        Series::new("date", dates),
        Series::new("moneyness", moneyness),
        Series::new("Mid", mids),
    ])?;

    Ok(df)
}

/// Convert labelled series observations to a Polars DataFrame
pub fn series_points_to_dataframe(points: &[SeriesPoint]) -> Result<DataFrame> {
    let mut dates = Vec::with_capacity(points.len());
    let mut labels = Vec::with_capacity(points.len());
    let mut mids = Vec::with_capacity(points.len());

    for p in points {
        dates.push(date_ordinal(p.date));
        labels.push(p.label.as_str());
        mids.push(p.mid);
    }

    let df = DataFrame::new(vec![
        Series::new("date", dates),
        Series::new("label", labels),
        Series::new("Mid", mids),
    ])?;

    Ok(df)
}

/// Mean `Mid` per (date, key) using the Lazy API, sorted by date then key
fn mean_by_date_and(df: DataFrame, key: &str) -> Result<DataFrame> {
    let result = df
        .lazy()
        .group_by([col("date"), col(key)])
        .agg([col("Mid").mean().alias("Mid")])
        .sort_by_exprs(vec![col("date"), col(key)], vec![false, false], false, false)
        .collect()?;
    Ok(result)
}

/// Pivot surface observations into a (date x moneyness) matrix of mean `Mid`.
/// Duplicate coordinates are averaged; missing cells are `NaN`.
pub fn pivot_surface(points: &[SurfacePoint]) -> Result<SurfaceMatrix> {
    if points.is_empty() {
        return SurfaceMatrix::new(Vec::new(), Vec::new(), Array2::zeros((0, 0)));
    }

    let grouped = mean_by_date_and(surface_points_to_dataframe(points)?, "moneyness")?;
    let dates = grouped.column("date")?.i32()?;
    let keys = grouped.column("moneyness")?.f64()?;
    let mids = grouped.column("Mid")?.f64()?;

    let mut cells = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        if let (Some(d), Some(k), Some(v)) = (dates.get(i), keys.get(i), mids.get(i)) {
            cells.push((d, k, v));
        }
    }

    let mut offsets: Vec<f64> = cells.iter().map(|(_, k, _)| *k).collect();
    offsets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Less));
    offsets.dedup();

    let row_index = ordinal_index(cells.iter().map(|(d, _, _)| *d));
    let mut values = Array2::from_elem((row_index.len(), offsets.len()), f64::NAN);
    for (d, k, v) in &cells {
        if let (Some(&i), Some(j)) = (row_index.get(d), offsets.iter().position(|o| o == k)) {
            values[[i, j]] = *v;
        }
    }

    SurfaceMatrix::new(ordinal_dates(&row_index), offsets, values)
}

/// Pivot labelled observations into a (date x label) matrix of mean `Mid`.
pub fn pivot_series(points: &[SeriesPoint]) -> Result<SeriesMatrix> {
    if points.is_empty() {
        return SeriesMatrix::new(Vec::new(), Vec::new(), Array2::zeros((0, 0)));
    }

    let grouped = mean_by_date_and(series_points_to_dataframe(points)?, "label")?;
    let dates = grouped.column("date")?.i32()?;
    let labels = grouped.column("label")?.utf8()?;
    let mids = grouped.column("Mid")?.f64()?;

    let mut cells = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        if let (Some(d), Some(l), Some(v)) = (dates.get(i), labels.get(i), mids.get(i)) {
            cells.push((d, l.to_string(), v));
        }
    }

    let mut columns: Vec<String> = cells.iter().map(|(_, l, _)| l.clone()).collect();
    columns.sort();
    columns.dedup();

    let row_index = ordinal_index(cells.iter().map(|(d, _, _)| *d));
    let mut values = Array2::from_elem((row_index.len(), columns.len()), f64::NAN);
    for (d, l, v) in &cells {
        if let (Some(&i), Ok(j)) = (row_index.get(d), columns.binary_search(l)) {
            values[[i, j]] = *v;
        }
    }

    SeriesMatrix::new(ordinal_dates(&row_index), columns, values)
}

/// Map each distinct date ordinal to its ascending row position
fn ordinal_index<I: Iterator<Item = i32>>(ordinals: I) -> BTreeMap<i32, usize> {
    let mut index: BTreeMap<i32, usize> = ordinals.map(|d| (d, 0)).collect();
    for (pos, slot) in index.values_mut().enumerate() {
        *slot = pos;
    }
    index
}

fn ordinal_dates(index: &BTreeMap<i32, usize>) -> Vec<NaiveDate> {
    index.keys().filter_map(|&d| from_ordinal(d)).collect()
}
