//! Buffer extraction of site covariates

use super::Site;
use birdocc_core::io::CovariateTable;
use birdocc_core::{Error, Raster, RasterStack, Result};

/// Grouped land-cover classes (1..=k, 0 unclassified) with their names
#[derive(Debug, Clone, Copy)]
pub struct LandcoverLayer<'a> {
    pub classes: &'a Raster<f64>,
    pub names: &'a [String],
}

/// Cells whose centres lie within `radius` of (x, y); falls back to the
/// containing cell when the buffer is smaller than a cell.
fn buffer_cells(raster: &Raster<f64>, x: f64, y: f64, radius: f64) -> Vec<(usize, usize)> {
    let (rows, cols) = raster.shape();
    let (c0, r0) = raster.geo_to_pixel(x - radius, y + radius);
    let (c1, r1) = raster.geo_to_pixel(x + radius, y - radius);
    let clamp = |v: f64, n: usize| v.floor().clamp(0.0, n as f64) as usize;
    let (col_lo, col_hi) = (clamp(c0.min(c1), cols), clamp(c0.max(c1) + 1.0, cols));
    let (row_lo, row_hi) = (clamp(r0.min(r1), rows), clamp(r0.max(r1) + 1.0, rows));

    let r2 = radius * radius;
    let mut cells = Vec::new();
    for row in row_lo..row_hi {
        for col in col_lo..col_hi {
            let (cx, cy) = raster.pixel_to_geo(col, row);
            if (cx - x).powi(2) + (cy - y).powi(2) <= r2 {
                cells.push((row, col));
            }
        }
    }
    if cells.is_empty() {
        if let Some(cell) = raster.cell_of(x, y) {
            cells.push(cell);
        }
    }
    cells
}

/// Site covariate table: the buffer mean of every continuous layer in
/// `stack` followed by `lc_<name>`, the share of buffer cells in each
/// land-cover class. Sites outside the grid get NaN.
pub fn extract_buffer_covariates(
    sites: &[Site],
    stack: &RasterStack,
    landcover: Option<LandcoverLayer<'_>>,
    radius: f64,
) -> Result<CovariateTable> {
    if radius < 0.0 || !radius.is_finite() {
        return Err(Error::InvalidParameter {
            name: "thinning.buffer_radius",
            value: radius.to_string(),
            reason: "must be a non-negative distance".into(),
        });
    }
    if let Some(lc) = landcover {
        if !stack.grid().matches(lc.classes) {
            return Err(Error::SizeMismatch {
                er: stack.grid().rows,
                ec: stack.grid().cols,
                ar: lc.classes.rows(),
                ac: lc.classes.cols(),
            });
        }
    }

    let mut columns: Vec<String> = stack.names().map(str::to_string).collect();
    if let Some(lc) = landcover {
        columns.extend(lc.names.iter().map(|n| format!("lc_{}", n)));
    }
    let mut table = CovariateTable::new("site_id", columns);
    let template = stack.grid().raster(f64::NAN);

    for site in sites {
        let cells = buffer_cells(&template, site.x, site.y, radius);
        let mut row = Vec::with_capacity(table.columns.len());

        for (_, layer) in stack.iter() {
            let (sum, n) = cells
                .iter()
                .map(|&(r, c)| layer.data()[(r, c)])
                .filter(|v| !layer.is_nodata(*v))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            row.push(if n > 0 { sum / n as f64 } else { f64::NAN });
        }

        if let Some(lc) = landcover {
            let mut counts = vec![0usize; lc.names.len() + 1];
            for &(r, c) in &cells {
                let v = lc.classes.data()[(r, c)];
                if v.is_finite() && v >= 0.0 {
                    let k = v.round() as usize;
                    if k < counts.len() {
                        counts[k] += 1;
                    }
                }
            }
            let total: usize = counts.iter().sum();
            for count in &counts[1..] {
                row.push(if total > 0 {
                    *count as f64 / total as f64
                } else {
                    f64::NAN
                });
            }
        }
        table.push_row(site.site_id.clone(), row)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use birdocc_core::{GeoTransform, GridSpec, CRS};

    fn grid() -> GridSpec {
        GridSpec {
            transform: GeoTransform::new(0.0, 5000.0, 1000.0, -1000.0),
            rows: 5,
            cols: 5,
            crs: CRS::from_epsg(32643),
        }
    }

    fn site(id: &str, x: f64, y: f64) -> Site {
        Site {
            site_id: id.into(),
            longitude: 0.0,
            latitude: 0.0,
            x,
            y,
            n_visits: 2,
        }
    }

    #[test]
    fn test_buffer_mean_and_proportions() {
        let g = grid();
        let mut elevation = g.raster(0.0);
        for r in 0..5 {
            for c in 0..5 {
                elevation.set(r, c, (10 * r + c) as f64).unwrap();
            }
        }
        let mut stack = RasterStack::new(g.clone());
        stack.push("elevation", elevation).unwrap();

        // forest (1) in column 2, agriculture (2) elsewhere
        let mut classes = g.raster(2.0);
        for r in 0..5 {
            classes.set(r, 2, 1.0).unwrap();
        }
        let names = vec!["forest".to_string(), "agriculture".to_string()];
        let lc = LandcoverLayer {
            classes: &classes,
            names: &names,
        };

        // centre cell (2, 2) at (2500, 2500); radius 1000 takes the plus shape
        let sites = vec![site("centre", 2500.0, 2500.0), site("outside", -9000.0, 0.0)];
        let table = extract_buffer_covariates(&sites, &stack, Some(lc), 1000.0).unwrap();

        assert_eq!(table.columns, vec!["elevation", "lc_forest", "lc_agriculture"]);
        assert_relative_eq!(table.get(0, "elevation").unwrap(), 22.0);
        assert_relative_eq!(table.get(0, "lc_forest").unwrap(), 0.6);
        assert_relative_eq!(table.get(0, "lc_agriculture").unwrap(), 0.4);
        assert!(table.get(1, "elevation").unwrap().is_nan());
    }

    #[test]
    fn test_small_radius_uses_containing_cell() {
        let g = grid();
        let mut stack = RasterStack::new(g.clone());
        let mut layer = g.raster(1.0);
        layer.set(0, 0, 42.0).unwrap();
        stack.push("bio1", layer).unwrap();
        let table = extract_buffer_covariates(&[site("a", 100.0, 4900.0)], &stack, None, 10.0).unwrap();
        assert_relative_eq!(table.get(0, "bio1").unwrap(), 42.0);
    }

    #[test]
    fn test_negative_radius_rejected() {
        let stack = RasterStack::new(grid());
        assert!(extract_buffer_covariates(&[], &stack, None, -1.0).is_err());
    }
}
