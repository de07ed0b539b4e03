use crate::error::{Result, VolPipelineError};
use crate::models::{SeriesMatrix, SurfaceMatrix};
use crate::utils::dates::{date_ordinal, from_ordinal};
use chrono::NaiveDate;
use image::ImageFormat;
use plotters::backend::BitMapBackend;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

const GRAY: RGBColor = RGBColor(128, 128, 128);

/// An RGB raster produced by one of the renderers below.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderedImage {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; (width * height * 3) as usize],
        }
    }

    pub fn save_png<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        image::save_buffer_with_format(
            output_path.as_ref(),
            &self.pixels,
            self.width,
            self.height,
            image::ColorType::Rgb8,
            ImageFormat::Png,
        )?;
        Ok(())
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> VolPipelineError {
    VolPipelineError::PlotError(e.to_string())
}

/// Pad a value range so a flat series still gets a drawable axis.
fn padded(lo: f64, hi: f64, frac: f64) -> Range<f64> {
    let span = hi - lo;
    if span.abs() < f64::EPSILON {
        let pad = if lo.abs() > f64::EPSILON { lo.abs() * 0.1 } else { 0.5 };
        (lo - pad)..(hi + pad)
    } else {
        (lo - frac * span)..(hi + frac * span)
    }
}

fn date_label(ordinal: &i32) -> String {
    from_ordinal(*ordinal)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub fn plot_surface<P: AsRef<Path>>(surface: &SurfaceMatrix, title: &str, output_path: P) -> Result<()> {
    plot_surface_in_memory(surface, title)?.save_png(output_path)
}

/// 3-D view of a surface matrix: moneyness across, implied volatility up,
/// date ordinal in depth. Cells with four defined corners are drawn as
/// VIRIDIS-coloured quads; isolated points are drawn as markers.
pub fn plot_surface_in_memory(surface: &SurfaceMatrix, title: &str) -> Result<RenderedImage> {
    let (vol_lo, vol_hi) = surface
        .value_range()
        .ok_or_else(|| VolPipelineError::PlotError("No valid data points for surface plot".to_string()))?;

    let ordinals: Vec<f64> = surface.dates.iter().map(|d| date_ordinal(*d) as f64).collect();
    let m_lo = surface.columns.iter().copied().fold(f64::INFINITY, f64::min);
    let m_hi = surface.columns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let d_lo = ordinals.iter().copied().fold(f64::INFINITY, f64::min);
    let d_hi = ordinals.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let x_range = padded(m_lo, m_hi, 0.05);
    let y_range = padded(vol_lo, vol_hi, 0.1);
    let z_range = padded(d_lo, d_hi, 0.02);

    let color_gradient = colorous::VIRIDIS;
    let shade = |v: f64| {
        let t = if vol_hi > vol_lo { (v - vol_lo) / (vol_hi - vol_lo) } else { 0.5 };
        let c = color_gradient.eval_continuous(t.clamp(0.0, 1.0));
        RGBColor(c.r, c.g, c.b)
    };

    let mut img = RenderedImage::blank(1000, 700);
    {
        let root = BitMapBackend::with_buffer(&mut img.pixels, (img.width, img.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 30).into_font())
            .margin(10)
            .build_cartesian_3d(x_range, y_range, z_range)
            .map_err(plot_err)?;

        chart.with_projection(|mut pb| {
            pb.yaw = 0.6;
            pb.pitch = 0.35;
            pb.scale = 0.85;
            pb.into_matrix()
        });

        chart
            .configure_axes()
            .light_grid_style(BLACK.mix(0.1))
            .max_light_lines(3)
            .draw()
            .map_err(plot_err)?;

        let (n_rows, n_cols) = surface.values.dim();
        let mut cells = Vec::new();
        for i in 0..n_rows.saturating_sub(1) {
            for j in 0..n_cols.saturating_sub(1) {
                let corners = [(i, j), (i, j + 1), (i + 1, j + 1), (i + 1, j)];
                if corners.iter().any(|&(r, c)| surface.get(r, c).is_nan()) {
                    continue;
                }
                let mean = corners.iter().map(|&(r, c)| surface.get(r, c)).sum::<f64>() / 4.0;
                let vertices: Vec<(f64, f64, f64)> = corners
                    .iter()
                    .map(|&(r, c)| (surface.columns[c], surface.get(r, c), ordinals[r]))
                    .collect();
                cells.push(Polygon::new(vertices, shade(mean).mix(0.85).filled()));
            }
        }

        if cells.is_empty() {
            let mut markers = Vec::new();
            for (i, &z) in ordinals.iter().enumerate() {
                for (j, &x) in surface.columns.iter().enumerate() {
                    let v = surface.get(i, j);
                    if !v.is_nan() {
                        markers.push(Circle::new((x, v, z), 4, shade(v).filled()));
                    }
                }
            }
            chart.draw_series(markers).map_err(plot_err)?;
        } else {
            chart.draw_series(cells).map_err(plot_err)?;
        }

        root.draw_text(
            "x: Moneyness   y: Implied Volatility   z: Date (ordinal)",
            &TextStyle::from(("sans-serif", 15)).color(&BLACK),
            (10, img.height as i32 - 25),
        )
        .map_err(plot_err)?;

        root.present().map_err(plot_err)?;
    }

    Ok(img)
}

/// One line on a 2-D date chart.
struct Line<'a> {
    label: &'a str,
    points: Vec<(NaiveDate, f64)>,
    color: RGBColor,
    width: u32,
}

fn draw_date_panel(
    area: &DrawingArea<BitMapBackend, Shift>,
    caption: &str,
    y_desc: &str,
    lines: &[Line],
) -> Result<()> {
    let all: Vec<(i32, f64)> = lines
        .iter()
        .flat_map(|l| l.points.iter().map(|(d, v)| (date_ordinal(*d), *v)))
        .collect();

    let (x_lo, x_hi) = all
        .iter()
        .fold((i32::MAX, i32::MIN), |(lo, hi), (d, _)| (lo.min(*d), hi.max(*d)));
    let x_range = if all.is_empty() { 0..1 } else { x_lo..(x_hi + 1) };
    let y_range = match all.iter().map(|(_, v)| *v).fold(None, |acc: Option<(f64, f64)>, v| {
        Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
    }) {
        Some((lo, hi)) => padded(lo, hi, 0.1),
        None => -1.0..1.0,
    };

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 22).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc(y_desc)
        .x_labels(6)
        .x_label_formatter(&date_label)
        .axis_desc_style(("sans-serif", 15))
        .light_line_style(BLACK.mix(0.05))
        .draw()
        .map_err(plot_err)?;

    for line in lines {
        let color = line.color;
        chart
            .draw_series(LineSeries::new(
                line.points.iter().map(|(d, v)| (date_ordinal(*d), *v)),
                color.stroke_width(line.width),
            ))
            .map_err(plot_err)?
            .label(line.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    Ok(())
}

/// Stacked time-series chart for one column: original with its rolling
/// mean on top, daily change below, and an optional annotation panel.
pub fn plot_series_with_rolling_in_memory(
    original: &SeriesMatrix,
    rolling: &SeriesMatrix,
    change: &SeriesMatrix,
    col: usize,
    window: usize,
    title: &str,
    annotation: Option<&str>,
) -> Result<RenderedImage> {
    let panels = if annotation.is_some() { 3 } else { 2 };
    let mut img = RenderedImage::blank(1200, 450 * panels as u32);
    {
        let root = BitMapBackend::with_buffer(&mut img.pixels, (img.width, img.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;
        let areas = root.split_evenly((panels, 1));

        let rolling_label = format!("{}D Rolling Avg", window);
        draw_date_panel(
            &areas[0],
            title,
            "Volatility",
            &[
                Line {
                    label: "Original",
                    points: original.points(col),
                    color: GRAY,
                    width: 1,
                },
                Line {
                    label: &rolling_label,
                    points: rolling.points(col),
                    color: BLUE,
                    width: 3,
                },
            ],
        )?;

        draw_date_panel(
            &areas[1],
            "Daily Change",
            "Change in Volatility",
            &[Line {
                label: "Daily Change",
                points: change.points(col),
                color: RED,
                width: 1,
            }],
        )?;

        if let Some(text) = annotation {
            areas[2]
                .draw_text(
                    text,
                    &TextStyle::from(("sans-serif", 24)).color(&BLACK),
                    (40, 40),
                )
                .map_err(plot_err)?;
        }

        root.present().map_err(plot_err)?;
    }

    Ok(img)
}

pub fn plot_daily_change_in_memory(change: &SeriesMatrix, col: usize, title: &str) -> Result<RenderedImage> {
    let mut img = RenderedImage::blank(1200, 500);
    {
        let root = BitMapBackend::with_buffer(&mut img.pixels, (img.width, img.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;

        draw_date_panel(
            &root,
            title,
            "Change in Volatility",
            &[Line {
                label: "Daily Change",
                points: change.points(col),
                color: RED,
                width: 1,
            }],
        )?;

        root.present().map_err(plot_err)?;
    }

    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_ranges_are_padded() {
        let r = padded(0.3, 0.3, 0.1);
        assert!(r.start < 0.3 && r.end > 0.3);
        let r = padded(0.0, 0.0, 0.1);
        assert_eq!(r, -0.5..0.5);
        let r = padded(1.0, 3.0, 0.1);
        assert!((r.start - 0.8).abs() < 1e-12 && (r.end - 3.2).abs() < 1e-12);
    }

    #[test]
    fn ordinal_labels_are_iso_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(date_label(&date_ordinal(d)), "2024-03-15");
    }

    #[test]
    fn empty_surface_is_a_plot_error() {
        let empty = SurfaceMatrix::new(Vec::new(), Vec::new(), ndarray::Array2::zeros((0, 0))).unwrap();
        assert!(matches!(
            plot_surface_in_memory(&empty, "x"),
            Err(VolPipelineError::PlotError(_))
        ));
    }
}
