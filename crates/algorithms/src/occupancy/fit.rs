//! Fitting seam and fitted models

use super::detection::DetectionMatrix;
use super::likelihood::OccupancyDesign;
use super::model::{parameter_name, ModelSpec};
use super::optimize::{bfgs, numeric_hessian, BfgsOptions};
use super::serde_float::unbounded;
use crate::linalg::invert;
use birdocc_core::config::OccupancyConfig;
use birdocc_core::records::Submodel;
use birdocc_core::{Error, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One estimated coefficient on the logit scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub parameter: String,
    pub submodel: Submodel,
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub spec: ModelSpec,
    pub formula: String,
    pub coefficients: Vec<Coefficient>,
    pub log_likelihood: f64,
    /// Number of estimated parameters
    pub k: usize,
    /// Number of sites, the sample size of AICc
    pub n_sites: usize,
    pub aic: f64,
    /// Infinite (null in JSON) when n ≤ k + 1
    #[serde(deserialize_with = "unbounded")]
    pub aicc: f64,
    pub iterations: usize,
}

/// Small-sample corrected AIC; infinite when n ≤ k + 1
pub fn aicc(log_likelihood: f64, k: usize, n: usize) -> f64 {
    let aic = -2.0 * log_likelihood + 2.0 * k as f64;
    let denom = n as f64 - k as f64 - 1.0;
    if denom <= 0.0 {
        f64::INFINITY
    } else {
        aic + 2.0 * (k * (k + 1)) as f64 / denom
    }
}

impl FittedModel {
    /// Assemble a fit from estimates in [`ModelSpec::parameters`] order
    pub fn new(
        spec: ModelSpec,
        estimates: &[f64],
        std_errors: &[f64],
        log_likelihood: f64,
        n_sites: usize,
        iterations: usize,
    ) -> Result<Self> {
        let parameters = spec.parameters();
        if estimates.len() != parameters.len() || std_errors.len() != parameters.len() {
            return Err(Error::SizeMismatch {
                er: parameters.len(),
                ec: parameters.len(),
                ar: estimates.len(),
                ac: std_errors.len(),
            });
        }
        let coefficients = parameters
            .into_iter()
            .zip(estimates.iter().zip(std_errors))
            .map(|((submodel, term), (&estimate, &std_error))| Coefficient {
                parameter: parameter_name(submodel, &term),
                submodel,
                term,
                estimate,
                std_error,
            })
            .collect();
        let k = estimates.len();
        Ok(Self {
            formula: spec.formula(),
            spec,
            coefficients,
            log_likelihood,
            k,
            n_sites,
            aic: -2.0 * log_likelihood + 2.0 * k as f64,
            aicc: aicc(log_likelihood, k, n_sites),
            iterations,
        })
    }

    pub fn coefficient(&self, parameter: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.parameter == parameter)
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.coefficient(parameter).is_some()
    }

    pub fn estimates(&self) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.estimate).collect()
    }

    /// Fitted ψ per site and p per site and visit on `matrix`
    pub fn predict(&self, matrix: &DetectionMatrix) -> Result<(Array1<f64>, Array2<f64>)> {
        let design = OccupancyDesign::new(matrix, &self.spec)?;
        Ok(design.probabilities(&self.estimates()))
    }
}

/// Estimator of single-season occupancy models.
///
/// Model selection only ranks what a fitter returns, so any estimator can
/// be plugged in.
pub trait OccupancyFitter: Send + Sync {
    fn fit(&self, matrix: &DetectionMatrix, spec: &ModelSpec) -> Result<FittedModel>;
}

/// Maximum likelihood by BFGS from θ = 0, standard errors from the inverse
/// of a numeric Hessian.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumLikelihood {
    pub options: BfgsOptions,
}

impl MaximumLikelihood {
    pub fn from_config(config: &OccupancyConfig) -> Self {
        Self {
            options: BfgsOptions {
                max_iterations: config.max_iterations,
                gradient_tolerance: config.gradient_tolerance,
            },
        }
    }
}

impl OccupancyFitter for MaximumLikelihood {
    fn fit(&self, matrix: &DetectionMatrix, spec: &ModelSpec) -> Result<FittedModel> {
        let design = OccupancyDesign::new(matrix, spec)?;
        let start = vec![0.0; design.n_params()];
        let result = bfgs(|theta| design.nll_and_gradient(theta), start, &self.options)?;
        if !result.converged {
            return Err(Error::Convergence {
                iterations: result.iterations,
                gradient_norm: result.gradient_norm,
            });
        }

        let hessian = numeric_hessian(|theta| design.nll_and_gradient(theta).1, &result.x);
        let names = spec.parameter_names();
        if let Some(j) = (0..hessian.nrows()).find(|&j| !(hessian[(j, j)] > 0.0)) {
            return Err(Error::Unidentifiable(format!(
                "Hessian is not positive at {}",
                names[j]
            )));
        }
        let covariance = invert(&hessian)
            .map_err(|_| Error::Unidentifiable("Hessian is singular".to_string()))?;
        let mut std_errors = Vec::with_capacity(names.len());
        for (j, name) in names.iter().enumerate() {
            let var = covariance[(j, j)];
            if !(var > 0.0) || !var.is_finite() {
                return Err(Error::Unidentifiable(format!(
                    "non-positive variance for {}",
                    name
                )));
            }
            std_errors.push(var.sqrt());
        }

        debug!(
            "{}: {} converged in {} iterations, -logL {:.4}",
            matrix.species,
            spec.formula(),
            result.iterations,
            result.value
        );
        FittedModel::new(
            spec.clone(),
            &result.x,
            &std_errors,
            -result.value,
            design.n_sites(),
            result.iterations,
        )
    }
}
