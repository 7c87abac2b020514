//! # birdocc core
//!
//! Core types and I/O shared by every stage of the birdocc pipeline.
//!
//! This crate provides:
//! - `Raster<T>`, `GeoTransform`, `GridSpec` and `RasterStack` for gridded covariates
//! - `CRS` and `CoordTransform` (WGS84 ↔ UTM)
//! - Record types for checklists, detections, observer scores and visits
//! - `StudyArea` geometry
//! - `PipelineConfig`, loaded from TOML
//! - GeoTIFF, CSV and JSON readers/writers

pub mod config;
pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod records;
pub mod vector;

pub use config::{AveragingMethod, PipelineConfig, PipelinePaths};
pub use crs::{CoordTransform, CRS};
pub use error::{Error, Result};
pub use raster::{GeoTransform, GridSpec, Raster, RasterElement, RasterStack};
pub use vector::{StudyArea, StudyAreaDef};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{CoordTransform, CRS};
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, GridSpec, Raster, RasterElement, RasterStack};
    pub use crate::records::*;
    pub use crate::vector::StudyArea;
}
