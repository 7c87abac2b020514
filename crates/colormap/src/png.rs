//! PNG output

use crate::render::{raster_to_rgba, upscale_rgba, ColormapParams};
use birdocc_core::error::{Error, Result};
use birdocc_core::raster::{Raster, RasterElement};
use std::path::Path;

/// Write an RGBA buffer as PNG
pub fn write_rgba_png<P: AsRef<Path>>(path: P, rgba: &[u8], width: u32, height: u32) -> Result<()> {
    image::save_buffer_with_format(
        path.as_ref(),
        rgba,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| Error::Other(format!("cannot write {}: {}", path.as_ref().display(), e)))
}

/// Render a matrix-shaped raster as a heatmap, each cell drawn as a
/// `cell_px` square.
pub fn write_heatmap<T, P>(
    raster: &Raster<T>,
    params: &ColormapParams,
    cell_px: usize,
    path: P,
) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let (rows, cols) = raster.shape();
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }
    let cell_px = cell_px.max(1);
    let rgba = upscale_rgba(&raster_to_rgba(raster, params), cols, rows, cell_px);
    write_rgba_png(path, &rgba, (cols * cell_px) as u32, (rows * cell_px) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColorScheme;

    #[test]
    fn heatmap_writes_png_of_expected_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heat.png");
        let r = Raster::<f64>::from_vec(vec![0.0, 0.5, 1.0, f64::NAN, 0.2, 0.9], 2, 3).unwrap();
        let params = ColormapParams::with_range(ColorScheme::Sequential, 0.0, 1.0);
        write_heatmap(&r, &params, 10, &path).unwrap();

        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
    }

    #[test]
    fn empty_heatmap_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = Raster::<f64>::new(0, 3);
        let params = ColormapParams::with_range(ColorScheme::Sequential, 0.0, 1.0);
        assert!(write_heatmap(&r, &params, 4, dir.path().join("x.png")).is_err());
    }
}
