//! Slope and aspect from the aligned elevation grid.
//!
//! Horn (1981) gradients over a 3x3 window:
//! ```text
//! a b c
//! d e f
//! g h i
//! ```
//! dz/dx = ((c + 2f + i) - (a + 2d + g)) / 8·cellsize,
//! dz/dy = ((g + 2h + i) - (a + 2b + c)) / 8·cellsize.
//! Edge cells and cells touching no-data are NaN.

use crate::maybe_rayon::*;
use birdocc_core::{Error, Raster, Result};
use ndarray::Array2;
use std::f64::consts::PI;

const FLAT_THRESHOLD: f64 = 1e-10;

/// Apply `f(dz_dx, dz_dy)` at every interior cell
fn horn_map<F>(dem: &Raster<f64>, f: F) -> Result<Raster<f64>>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    let (rows, cols) = dem.shape();
    let eight_cell_size = 8.0 * dem.cell_size();
    let z = dem.data();
    let valid = |v: f64| !dem.is_nodata(v);

    let output_data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![f64::NAN; cols];
            if row == 0 || row + 1 >= rows {
                return row_data;
            }
            for col in 1..cols.saturating_sub(1) {
                let w = [
                    z[(row - 1, col - 1)],
                    z[(row - 1, col)],
                    z[(row - 1, col + 1)],
                    z[(row, col - 1)],
                    z[(row, col)],
                    z[(row, col + 1)],
                    z[(row + 1, col - 1)],
                    z[(row + 1, col)],
                    z[(row + 1, col + 1)],
                ];
                if !w.iter().all(|v| valid(*v)) {
                    continue;
                }
                let [a, b, c, d, _, f_, g, h, i] = w;
                let dz_dx = ((c + 2.0 * f_ + i) - (a + 2.0 * d + g)) / eight_cell_size;
                let dz_dy = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / eight_cell_size;
                row_data[col] = f(dz_dx, dz_dy);
            }
            row_data
        })
        .collect();

    let mut output = dem.with_same_meta::<f64>(rows, cols);
    output.set_nodata(Some(f64::NAN));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;
    Ok(output)
}

/// Slope in degrees. Elevation and cell size must share units.
pub fn slope(dem: &Raster<f64>) -> Result<Raster<f64>> {
    horn_map(dem, |dx, dy| (dx * dx + dy * dy).sqrt().atan().to_degrees())
}

/// Aspect as a compass bearing in degrees (0 = north, clockwise); flat
/// cells are NaN.
pub fn aspect(dem: &Raster<f64>) -> Result<Raster<f64>> {
    horn_map(dem, |dx, dy| {
        if dx.abs() < FLAT_THRESHOLD && dy.abs() < FLAT_THRESHOLD {
            return f64::NAN;
        }
        // downslope direction: east = -dx, north = dy (rows run south)
        let bearing = (-dx).atan2(dy);
        if bearing < 0.0 {
            (bearing + 2.0 * PI).to_degrees()
        } else {
            bearing.to_degrees()
        }
    })
}

/// cos(aspect): +1 facing north, -1 facing south. Linear stand-in for the
/// circular aspect in regression models.
pub fn northness(aspect_deg: &Raster<f64>) -> Raster<f64> {
    let mut out = aspect_deg.clone();
    out.data_mut().mapv_inplace(|a| a.to_radians().cos());
    out.set_nodata(Some(f64::NAN));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use birdocc_core::GeoTransform;

    fn plane(f: impl Fn(usize, usize) -> f64) -> Raster<f64> {
        let mut dem = Raster::new(7, 7);
        dem.set_transform(GeoTransform::new(0.0, 70.0, 10.0, -10.0));
        for row in 0..7 {
            for col in 0..7 {
                dem.set(row, col, f(row, col)).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_slope_flat_and_tilted() {
        let flat = slope(&plane(|_, _| 100.0)).unwrap();
        assert_relative_eq!(flat.get(3, 3).unwrap(), 0.0);
        assert!(flat.get(0, 3).unwrap().is_nan());

        // rises 10 m per 10 m cell eastward: 45 degrees
        let tilted = slope(&plane(|_, c| c as f64 * 10.0)).unwrap();
        assert_relative_eq!(tilted.get(3, 3).unwrap(), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_aspect_faces_downslope() {
        // elevation increases northward (decreasing row): faces south
        let south = aspect(&plane(|r, _| (6 - r) as f64)).unwrap();
        assert_relative_eq!(south.get(3, 3).unwrap(), 180.0, epsilon = 1e-9);

        // elevation increases eastward: faces west
        let west = aspect(&plane(|_, c| c as f64)).unwrap();
        assert_relative_eq!(west.get(3, 3).unwrap(), 270.0, epsilon = 1e-9);

        assert!(aspect(&plane(|_, _| 5.0)).unwrap().get(3, 3).unwrap().is_nan());
    }

    #[test]
    fn test_nodata_neighbour_propagates() {
        let mut dem = plane(|_, c| c as f64);
        dem.set(2, 2, f64::NAN).unwrap();
        let s = slope(&dem).unwrap();
        assert!(s.get(3, 3).unwrap().is_nan());
        assert!(!s.get(4, 4).unwrap().is_nan());
    }

    #[test]
    fn test_northness() {
        let a = Raster::from_vec(vec![0.0, 180.0, f64::NAN], 1, 3).unwrap();
        let n = northness(&a);
        assert_relative_eq!(n.get(0, 0).unwrap(), 1.0);
        assert_relative_eq!(n.get(0, 1).unwrap(), -1.0, epsilon = 1e-12);
        assert!(n.get(0, 2).unwrap().is_nan());
    }
}
