//! Environmental covariate preparation
//!
//! Every input raster is warped onto one reference grid ([`GridSpec`]) so
//! that layers can be stacked cell for cell:
//!
//! - elevation, then slope/aspect/northness from the aligned DEM
//! - monthly climate, then bioclimatic indices
//! - land cover, reclassified into grouped classes
//!
//! [`GridSpec`]: birdocc_core::GridSpec

mod bioclim;
mod landcover;
mod terrain;
mod warp;

pub use bioclim::{bioclim, Bioclim, MonthlyStack};
pub use landcover::reclassify_landcover;
pub use terrain::{aspect, northness, slope};
pub use warp::{warp, Resampling, MAX_SUPERSAMPLE};
