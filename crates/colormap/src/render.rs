//! Matrix-to-RGBA rendering using color schemes.

use crate::scheme::{evaluate, ColorScheme, Rgb};
use birdocc_core::raster::{Raster, RasterElement};

/// Parameters for colormap rendering.
#[derive(Debug, Clone)]
pub struct ColormapParams {
    pub scheme: ColorScheme,
    /// Values below this are clamped
    pub min: f64,
    /// Values above this are clamped
    pub max: f64,
    /// RGBA for no-data cells (missing predictor, failed species)
    pub nodata_color: [u8; 4],
}

impl ColormapParams {
    pub fn with_range(scheme: ColorScheme, min: f64, max: f64) -> Self {
        Self {
            scheme,
            min,
            max,
            nodata_color: [200, 200, 200, 255],
        }
    }
}

fn finite_range<T: RasterElement>(raster: &Raster<T>) -> Option<(f64, f64)> {
    raster
        .data()
        .iter()
        .filter(|v| !raster.is_nodata(**v))
        .filter_map(|v| v.to_f64())
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Min/max of the valid cells; falls back to [0, 1] when all cells are
/// no-data and widens a constant range by one.
pub fn auto_params<T: RasterElement>(raster: &Raster<T>, scheme: ColorScheme) -> ColormapParams {
    let (min, max) = match finite_range(raster) {
        None => (0.0, 1.0),
        Some((lo, hi)) if (hi - lo).abs() < f64::EPSILON => (lo, lo + 1.0),
        Some(range) => range,
    };
    ColormapParams::with_range(scheme, min, max)
}

/// Range symmetric about zero, so a diverging scheme puts zero at its midpoint
pub fn symmetric_params<T: RasterElement>(
    raster: &Raster<T>,
    scheme: ColorScheme,
) -> ColormapParams {
    let bound = finite_range(raster)
        .map(|(lo, hi)| lo.abs().max(hi.abs()))
        .filter(|b| *b > f64::EPSILON)
        .unwrap_or(1.0);
    ColormapParams::with_range(scheme, -bound, bound)
}

/// Convert a raster to a row-major RGBA buffer of `rows * cols * 4` bytes.
pub fn raster_to_rgba<T: RasterElement>(raster: &Raster<T>, params: &ColormapParams) -> Vec<u8> {
    let range = params.max - params.min;
    let inv_range = if range.abs() > f64::EPSILON {
        1.0 / range
    } else {
        1.0
    };

    let mut rgba = Vec::with_capacity(raster.len() * 4);
    for val in raster.data().iter() {
        let value = if raster.is_nodata(*val) {
            None
        } else {
            val.to_f64().filter(|v| v.is_finite())
        };
        match value {
            Some(v) => {
                let Rgb { r, g, b } = evaluate(params.scheme, (v - params.min) * inv_range);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
            None => rgba.extend_from_slice(&params.nodata_color),
        }
    }
    rgba
}

/// Repeat every pixel of an RGBA image into a `scale` x `scale` block
pub fn upscale_rgba(rgba: &[u8], width: usize, height: usize, scale: usize) -> Vec<u8> {
    let scale = scale.max(1);
    let out_w = width * scale;
    let mut out = vec![0u8; out_w * height * scale * 4];
    for row in 0..height * scale {
        for col in 0..out_w {
            let src = ((row / scale) * width + col / scale) * 4;
            let dst = (row * out_w + col) * 4;
            out[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_to_rgba_basic() {
        let mut r = Raster::<f64>::new(2, 2);
        r.set(0, 1, 0.5).unwrap();
        r.set(1, 0, 1.0).unwrap();
        r.set(1, 1, f64::NAN).unwrap();

        let params = ColormapParams::with_range(ColorScheme::Grayscale, 0.0, 1.0);
        let rgba = raster_to_rgba(&r, &params);

        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[128, 128, 128, 255]);
        assert_eq!(&rgba[8..12], &[255, 255, 255, 255]);
        assert_eq!(&rgba[12..16], &params.nodata_color);
    }

    #[test]
    fn auto_params_range_and_fallbacks() {
        let r = Raster::<f64>::from_vec(vec![10.0, 50.0, 100.0], 1, 3).unwrap();
        let params = auto_params(&r, ColorScheme::Sequential);
        assert_eq!((params.min, params.max), (10.0, 100.0));

        let empty = Raster::<f64>::filled(1, 2, f64::NAN);
        let params = auto_params(&empty, ColorScheme::Sequential);
        assert_eq!((params.min, params.max), (0.0, 1.0));

        let constant = Raster::<f64>::filled(2, 2, 42.0);
        let params = auto_params(&constant, ColorScheme::Sequential);
        assert_eq!((params.min, params.max), (42.0, 43.0));
    }

    #[test]
    fn symmetric_params_centre_zero() {
        let r = Raster::<f64>::from_vec(vec![-0.5, 2.0, f64::NAN], 1, 3).unwrap();
        let params = symmetric_params(&r, ColorScheme::BlueWhiteRed);
        assert_eq!((params.min, params.max), (-2.0, 2.0));
    }

    #[test]
    fn upscale_repeats_pixels() {
        let rgba = vec![1, 1, 1, 255, 2, 2, 2, 255];
        let out = upscale_rgba(&rgba, 2, 1, 2);
        assert_eq!(out.len(), 4 * 2 * 4);
        assert_eq!(&out[4..8], &[1, 1, 1, 255]);
        assert_eq!(&out[8..12], &[2, 2, 2, 255]);
        assert_eq!(&out[16..20], &[1, 1, 1, 255]);
    }
}
