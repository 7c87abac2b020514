//! Spatial thinning and site covariate attachment
//!
//! Checklists are reduced to at most one locality per grid cell, turned
//! into ordered repeat visits, and joined with buffer-averaged environmental
//! covariates and observer expertise.

mod buffer;
mod thin;

pub use buffer::{extract_buffer_covariates, LandcoverLayer};
pub use thin::{attach_expertise, thin_localities, Site, SiteVisit, ThinnedSites};
