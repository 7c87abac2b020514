//! Single-season occupancy models
//!
//! A species' detection histories ([`DetectionMatrix`]) are modelled as
//!
//! ```text
//! z_i   ~ Bernoulli(ψ_i),   logit ψ_i  = x_i β
//! y_ij  ~ Bernoulli(z_i p_ij), logit p_ij = w_ij α
//! ```
//!
//! fitted by maximum likelihood ([`MaximumLikelihood`]), ranked by AICc over
//! all covariate subsets ([`dredge`]), averaged over the top set
//! ([`model_average`]) and checked with the MacKenzie–Bailey bootstrap
//! ([`mb_gof_test`]). [`fit_species`] runs the whole sequence for one
//! species.
//!
//! Parameters are named `psi(term)` and `p(term)`, with `Int` for the
//! intercepts.

mod averaging;
mod detection;
mod fit;
mod gof;
mod likelihood;
mod model;
mod optimize;
mod selection;
mod serde_float;
mod species;

pub use averaging::{model_average, AveragedEstimate, Z_95};
pub use detection::{build_detection_matrix, DetectionMatrix, Scaling};
pub use fit::{aicc, Coefficient, FittedModel, MaximumLikelihood, OccupancyFitter};
pub use gof::{mb_chi_square, mb_gof_test, GofResult};
pub use likelihood::OccupancyDesign;
pub use model::{parameter_name, ModelSpec, INTERCEPT};
pub use optimize::{bfgs, numeric_hessian, BfgsOptions, BfgsResult};
pub use selection::{
    akaike_weights, dredge, subset_spec, Candidate, CandidateFit, Importance, ModelSelection,
    RankedModel, DEFAULT_DELTA, MAX_DREDGE_TERMS,
};
pub use species::{fit_all_species, fit_species, SpeciesBatch, SpeciesResult, SpeciesSettings};
