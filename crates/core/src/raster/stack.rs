//! Reference grid and grid-aligned layer stacks

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use serde::{Deserialize, Serialize};

/// Shape and georeferencing of the common covariate grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: CRS,
}

impl GridSpec {
    /// Smallest north-up grid with `cell_size` cells covering `bounds`
    /// (min_x, min_y, max_x, max_y), its edges snapped to multiples of the
    /// cell size.
    pub fn covering(bounds: (f64, f64, f64, f64), cell_size: f64, crs: CRS) -> Result<Self> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(Error::InvalidParameter {
                name: "cell_size",
                value: cell_size.to_string(),
                reason: "must be positive".into(),
            });
        }
        let (min_x, min_y, max_x, max_y) = bounds;
        if !(max_x > min_x && max_y > min_y) {
            return Err(Error::InvalidParameter {
                name: "bounds",
                value: format!("{:?}", bounds),
                reason: "empty extent".into(),
            });
        }

        let left = (min_x / cell_size).floor() * cell_size;
        let right = (max_x / cell_size).ceil() * cell_size;
        let bottom = (min_y / cell_size).floor() * cell_size;
        let top = (max_y / cell_size).ceil() * cell_size;

        let cols = (((right - left) / cell_size).round() as usize).max(1);
        let rows = (((top - bottom) / cell_size).round() as usize).max(1);

        Ok(Self {
            transform: GeoTransform::new(left, top, cell_size, -cell_size),
            rows,
            cols,
            crs,
        })
    }

    /// Grid description of an existing raster
    pub fn of<T: RasterElement>(raster: &Raster<T>, crs: CRS) -> Self {
        Self {
            transform: *raster.transform(),
            rows: raster.rows(),
            cols: raster.cols(),
            crs,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.cols, self.rows)
    }

    /// Blank raster on this grid, filled with `value`
    pub fn raster<T: RasterElement>(&self, value: T) -> Raster<T> {
        let mut r = Raster::filled(self.rows, self.cols, value);
        r.set_transform(self.transform);
        r.set_crs(Some(self.crs.clone()));
        r
    }

    /// Whether a raster has this grid's shape and transform
    pub fn matches<T: RasterElement>(&self, raster: &Raster<T>) -> bool {
        let t = raster.transform();
        let tol = self.cell_size() * 1e-6;
        raster.shape() == (self.rows, self.cols)
            && (t.origin_x - self.transform.origin_x).abs() <= tol
            && (t.origin_y - self.transform.origin_y).abs() <= tol
            && (t.pixel_width - self.transform.pixel_width).abs() <= tol
            && (t.pixel_height - self.transform.pixel_height).abs() <= tol
    }
}

/// Named layers sharing one grid.
#[derive(Debug, Clone)]
pub struct RasterStack {
    grid: GridSpec,
    layers: Vec<(String, Raster<f64>)>,
}

impl RasterStack {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            layers: Vec::new(),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Add a layer; rejects layers not aligned to the stack grid and
    /// replaces an existing layer with the same name.
    pub fn push(&mut self, name: impl Into<String>, layer: Raster<f64>) -> Result<()> {
        if !self.grid.matches(&layer) {
            return Err(Error::SizeMismatch {
                er: self.grid.rows,
                ec: self.grid.cols,
                ar: layer.rows(),
                ac: layer.cols(),
            });
        }
        let name = name.into();
        match self.layers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = layer,
            None => self.layers.push((name, layer)),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Raster<f64>> {
        self.layers.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Raster<f64>)> {
        self.layers.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
