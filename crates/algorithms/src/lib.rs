//! # birdocc algorithms
//!
//! The analysis stages of the birdocc pipeline, as pure functions over the
//! types of `birdocc-core`. File I/O and stage ordering live in the CLI.
//!
//! ## Stages
//!
//! - **ingest**: checklist cleaning and filtering
//! - **expertise**: observer expertise from a Poisson GLMM of richness
//! - **covariates**: grid alignment, terrain, bioclimatic indices, land cover
//! - **sampling**: spatial thinning into sites and visits, buffer covariates
//! - **occupancy**: occupancy likelihood, all-subsets selection by AICc,
//!   model averaging, MacKenzie–Bailey goodness of fit
//! - **summary**: cross-species tables and heatmaps

pub mod covariates;
pub mod expertise;
pub mod ingest;
pub mod linalg;
pub(crate) mod maybe_rayon;
pub mod occupancy;
pub mod sampling;
pub mod special;
pub mod summary;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::covariates::{bioclim, reclassify_landcover, slope, warp, Resampling};
    pub use crate::expertise::{fit_expertise, score_map};
    pub use crate::ingest::clean_checklists;
    pub use crate::occupancy::{
        build_detection_matrix, dredge, fit_all_species, fit_species, model_average,
        mb_gof_test, DetectionMatrix, FittedModel, MaximumLikelihood, ModelSelection,
        ModelSpec, OccupancyFitter, SpeciesResult, SpeciesSettings,
    };
    pub use crate::sampling::{attach_expertise, extract_buffer_covariates, thin_localities};
    pub use crate::summary::{collect_results, write_summary, ResultStore};
    pub use birdocc_core::prelude::*;
}
