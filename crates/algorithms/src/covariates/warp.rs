//! Reprojection and resampling onto the reference grid
//!
//! Inverse mapping: every target cell centre (or sub-cell sample point) is
//! carried into the source CRS and read from the source raster. Target
//! cells with no valid source sample are NaN.

use crate::maybe_rayon::*;
use birdocc_core::{CoordTransform, Error, GridSpec, Raster, Result, CRS};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on sub-samples per target cell edge for Average/Mode
pub const MAX_SUPERSAMPLE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Value of the source cell containing the target centre
    #[default]
    Nearest,
    /// Distance-weighted mean of the four nearest source centres
    Bilinear,
    /// Mean over sub-samples of the target cell (continuous layers)
    Average,
    /// Most frequent value over sub-samples (categorical layers)
    Mode,
}

/// Reproject `src` (in `src_crs`) onto `grid`
pub fn warp(
    src: &Raster<f64>,
    src_crs: &CRS,
    grid: &GridSpec,
    method: Resampling,
) -> Result<Raster<f64>> {
    if src.is_empty() {
        return Err(Error::InvalidDimensions {
            width: src.cols(),
            height: src.rows(),
        });
    }
    let to_src = CoordTransform::new(&grid.crs, src_crs)?;
    let (rows, cols) = (grid.rows, grid.cols);
    let factor = match method {
        Resampling::Average | Resampling::Mode => supersample_factor(src, grid, &to_src),
        _ => 1,
    };

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            (0..cols)
                .map(|col| match method {
                    Resampling::Nearest => {
                        let (x, y) = grid.transform.pixel_to_geo(col, row);
                        let (sx, sy) = to_src.apply(x, y);
                        src.value_at(sx, sy).unwrap_or(f64::NAN)
                    }
                    Resampling::Bilinear => {
                        let (x, y) = grid.transform.pixel_to_geo(col, row);
                        let (sx, sy) = to_src.apply(x, y);
                        bilinear(src, sx, sy)
                    }
                    Resampling::Average | Resampling::Mode => {
                        let samples = sub_samples(src, grid, &to_src, row, col, factor);
                        if method == Resampling::Average {
                            mean(&samples)
                        } else {
                            mode(&samples)
                        }
                    }
                })
                .collect::<Vec<f64>>()
        })
        .collect();

    let mut out = grid.raster(f64::NAN);
    out.set_nodata(Some(f64::NAN));
    *out.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(out)
}

/// Source pixels spanned by one target cell at the grid centre, rounded up
fn supersample_factor(src: &Raster<f64>, grid: &GridSpec, to_src: &CoordTransform) -> usize {
    let (c, r) = ((grid.cols / 2) as f64, (grid.rows / 2) as f64);
    let corners = [(c, r), (c + 1.0, r), (c, r + 1.0)];
    let px: Vec<(f64, f64)> = corners
        .iter()
        .map(|&(cc, rr)| {
            let (x, y) = grid.transform.fractional_to_geo(cc, rr);
            let (sx, sy) = to_src.apply(x, y);
            src.geo_to_pixel(sx, sy)
        })
        .collect();
    let span = |a: (f64, f64), b: (f64, f64)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let extent = span(px[0], px[1]).max(span(px[0], px[2]));
    if extent.is_finite() {
        (extent.ceil() as usize).clamp(1, MAX_SUPERSAMPLE)
    } else {
        1
    }
}

fn sub_samples(
    src: &Raster<f64>,
    grid: &GridSpec,
    to_src: &CoordTransform,
    row: usize,
    col: usize,
    factor: usize,
) -> Vec<f64> {
    let step = 1.0 / factor as f64;
    let mut out = Vec::with_capacity(factor * factor);
    for i in 0..factor {
        for j in 0..factor {
            let fc = col as f64 + (j as f64 + 0.5) * step;
            let fr = row as f64 + (i as f64 + 0.5) * step;
            let (x, y) = grid.transform.fractional_to_geo(fc, fr);
            let (sx, sy) = to_src.apply(x, y);
            if let Some(v) = src.value_at(sx, sy) {
                out.push(v);
            }
        }
    }
    out
}

fn bilinear(src: &Raster<f64>, x: f64, y: f64) -> f64 {
    let (fc, fr) = src.geo_to_pixel(x, y);
    // shift to cell-centre coordinates
    let (fc, fr) = (fc - 0.5, fr - 0.5);
    if !fc.is_finite() || !fr.is_finite() {
        return f64::NAN;
    }
    let (c0, r0) = (fc.floor(), fr.floor());
    let (tx, ty) = (fc - c0, fr - r0);

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (dr, wy) in [(0.0, 1.0 - ty), (1.0, ty)] {
        for (dc, wx) in [(0.0, 1.0 - tx), (1.0, tx)] {
            let (r, c) = (r0 + dr, c0 + dc);
            if r < 0.0 || c < 0.0 {
                continue;
            }
            let Ok(v) = src.get(r as usize, c as usize) else {
                continue;
            };
            let w = wx * wy;
            if !src.is_nodata(v) && w > 0.0 {
                sum += w * v;
                weight += w;
            }
        }
    }
    if weight > 0.0 {
        sum / weight
    } else {
        src.value_at(x, y).unwrap_or(f64::NAN)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Most frequent integer class; ties go to the smaller class
fn mode(values: &[f64]) -> f64 {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v.round() as i64).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(i64, usize)>, (k, n)| match best {
            Some((_, bn)) if bn >= n => best,
            _ => Some((k, n)),
        })
        .map_or(f64::NAN, |(k, _)| k as f64)
}
