//! Per-species model-fitting sequence and the species batch

use super::averaging::{model_average, AveragedEstimate};
use super::detection::DetectionMatrix;
use super::fit::{FittedModel, OccupancyFitter};
use super::gof::{mb_gof_test, GofResult};
use super::model::ModelSpec;
use super::selection::{dredge, Importance, ModelSelection, DEFAULT_DELTA};
use birdocc_core::config::OccupancyConfig;
use birdocc_core::records::Submodel;
use birdocc_core::{AveragingMethod, Error, Result};
use birdocc_parallel::ProcessingMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Settings of the stage-5 model sequence
#[derive(Debug, Clone, Copy)]
pub struct SpeciesSettings {
    pub min_detection_sites: usize,
    pub delta_threshold: f64,
    pub averaging: AveragingMethod,
    pub gof_simulations: usize,
    pub seed: u64,
    pub mode: ProcessingMode,
}

impl Default for SpeciesSettings {
    fn default() -> Self {
        Self {
            min_detection_sites: 10,
            delta_threshold: DEFAULT_DELTA,
            averaging: AveragingMethod::Conditional,
            gof_simulations: 100,
            seed: 42,
            mode: ProcessingMode::Parallel,
        }
    }
}

impl SpeciesSettings {
    pub fn from_config(config: &OccupancyConfig) -> Self {
        Self {
            min_detection_sites: config.min_detection_sites,
            delta_threshold: config.delta_threshold,
            averaging: config.averaging,
            gof_simulations: config.gof_simulations,
            seed: config.seed,
            mode: ProcessingMode::from_threads(config.threads),
        }
    }
}

/// Everything stage 5 reports for one species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesResult {
    pub species: String,
    pub n_sites: usize,
    pub n_observations: usize,
    pub n_detection_sites: usize,
    pub naive_occupancy: f64,
    pub null_model: FittedModel,
    /// Detection terms searched with occupancy ~ 1
    pub detection_selection: ModelSelection,
    /// Detection terms of the best detection model, held fixed afterwards
    pub det_terms: Vec<String>,
    pub occupancy_selection: ModelSelection,
    pub averaging: AveragingMethod,
    pub delta_threshold: f64,
    /// Formulas of the averaged top models
    pub top_models: Vec<String>,
    pub averaged: Vec<AveragedEstimate>,
    pub importance: Vec<Importance>,
    pub gof: Option<GofResult>,
}

/// Fit the model sequence for one species:
///
/// 1. null model `~1 ~1`
/// 2. all subsets of the detection covariates with occupancy `~1`
/// 3. the best detection terms fixed, all subsets of the occupancy covariates
/// 4. model averaging over Δ < threshold and importance over all candidates
/// 5. MacKenzie–Bailey test of the global model (the best model when the
///    global fit failed)
pub fn fit_species<F>(
    matrix: &DetectionMatrix,
    fitter: &F,
    settings: &SpeciesSettings,
) -> Result<SpeciesResult>
where
    F: OccupancyFitter + ?Sized,
{
    let species = matrix.species.as_str();
    let n_detection_sites = matrix.n_detection_sites();
    if n_detection_sites < settings.min_detection_sites {
        return Err(Error::InvalidParameter {
            name: "min_detection_sites",
            value: settings.min_detection_sites.to_string(),
            reason: format!("{} has detections at only {} sites", species, n_detection_sites),
        });
    }
    info!(
        "{}: {} sites, {} visits, naive occupancy {:.3}",
        species,
        matrix.n_sites(),
        matrix.n_observations(),
        matrix.naive_occupancy()
    );

    let null_model = fitter.fit(matrix, &ModelSpec::null())?;

    let det_global = ModelSpec::new(matrix.visit_covariates.clone(), vec![]);
    let detection_selection = dredge(matrix, &det_global, Submodel::Det, fitter, settings.mode)?;
    let det_terms = detection_selection
        .best()
        .map(|m| m.spec.det_terms.clone())
        .unwrap_or_default();

    let occ_global = ModelSpec::new(det_terms.clone(), matrix.site_covariates.clone());
    let occupancy_selection =
        dredge(matrix, &occ_global, Submodel::State, fitter, settings.mode)?;

    let averaged = model_average(&occupancy_selection, settings.delta_threshold, settings.averaging)?;
    let importance = occupancy_selection.importance();
    let top_models = occupancy_selection
        .top_models(settings.delta_threshold)
        .iter()
        .map(|r| r.formula.clone())
        .collect();

    let gof = if settings.gof_simulations == 0 {
        None
    } else {
        let tested = occupancy_selection
            .global_fit()
            .or_else(|| occupancy_selection.best());
        match tested {
            Some(model) => match mb_gof_test(
                matrix,
                model,
                fitter,
                settings.gof_simulations,
                settings.seed,
                settings.mode,
            ) {
                Ok(g) => Some(g),
                Err(e) => {
                    warn!("{}: goodness-of-fit test failed: {}", species, e);
                    None
                }
            },
            None => None,
        }
    };

    Ok(SpeciesResult {
        species: species.to_string(),
        n_sites: matrix.n_sites(),
        n_observations: matrix.n_observations(),
        n_detection_sites,
        naive_occupancy: matrix.naive_occupancy(),
        null_model,
        detection_selection,
        det_terms,
        occupancy_selection,
        averaging: settings.averaging,
        delta_threshold: settings.delta_threshold,
        top_models,
        averaged,
        importance,
        gof,
    })
}

/// Results of a species batch keyed by species
#[derive(Debug, Clone, Default)]
pub struct SpeciesBatch {
    pub results: BTreeMap<String, SpeciesResult>,
    /// species → error message
    pub failures: BTreeMap<String, String>,
}

/// Fit every species in turn. `build` assembles each species' own
/// detection matrix; a species whose matrix or fit fails is recorded in
/// `failures` and the batch moves on. `on_done` sees every outcome as it
/// completes.
pub fn fit_all_species<F, B, D>(
    species: &[String],
    mut build: B,
    fitter: &F,
    settings: &SpeciesSettings,
    mut on_done: D,
) -> SpeciesBatch
where
    F: OccupancyFitter + ?Sized,
    B: FnMut(&str) -> Result<DetectionMatrix>,
    D: FnMut(&str, std::result::Result<&SpeciesResult, &str>),
{
    let mut batch = SpeciesBatch::default();
    for name in species {
        let outcome = build(name).and_then(|matrix| fit_species(&matrix, fitter, settings));
        match outcome {
            Ok(result) => {
                on_done(name, Ok(&result));
                batch.results.insert(name.clone(), result);
            }
            Err(e) => {
                let message = e.to_string();
                warn!("{}: skipped: {}", name, message);
                on_done(name, Err(&message));
                batch.failures.insert(name.clone(), message);
            }
        }
    }
    info!(
        "fitted {} species, {} failed",
        batch.results.len(),
        batch.failures.len()
    );
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::fit::MaximumLikelihood;
    use crate::special::logistic;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// ψ = σ(0.3 + 1.2·x1), p = σ(-0.2 - 0.8·w); x2 has no effect
    fn synthetic(species: &str, n: usize, seed: u64) -> DetectionMatrix {
        let visits = 4;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut site_data = Array2::zeros((n, 2));
        let mut w = Array2::zeros((n, visits));
        let mut y = Array2::zeros((n, visits));
        for i in 0..n {
            let x1: f64 = rng.gen_range(-1.7..1.7);
            let x2: f64 = rng.gen_range(-1.7..1.7);
            site_data[(i, 0)] = x1;
            site_data[(i, 1)] = x2;
            let occupied = rng.gen::<f64>() < logistic(0.3 + 1.2 * x1);
            for j in 0..visits {
                let wij: f64 = rng.gen_range(-1.7..1.7);
                w[(i, j)] = wij;
                let detected = occupied && rng.gen::<f64>() < logistic(-0.2 - 0.8 * wij);
                y[(i, j)] = if detected { 1.0 } else { 0.0 };
            }
        }
        DetectionMatrix {
            species: species.into(),
            site_ids: (0..n).map(|i| format!("L{}", i)).collect(),
            y,
            site_covariates: vec!["x1".into(), "x2".into()],
            site_data,
            visit_covariates: vec!["w".into()],
            visit_data: vec![w],
            scaling: vec![],
        }
    }

    fn settings(gof_simulations: usize) -> SpeciesSettings {
        SpeciesSettings {
            gof_simulations,
            mode: ProcessingMode::Sequential,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_species_sequence() {
        let m = synthetic("Pycnonotus jocosus", 250, 5);
        let result = fit_species(&m, &MaximumLikelihood::default(), &settings(10)).unwrap();

        assert_eq!(result.detection_selection.candidates.len(), 2);
        assert_eq!(result.occupancy_selection.candidates.len(), 4);
        assert_eq!(result.det_terms, vec!["w"]);
        assert!(result
            .occupancy_selection
            .candidates
            .iter()
            .all(|c| c.spec.det_terms == vec!["w"]));

        let x1 = result.importance.iter().find(|i| i.parameter == "psi(x1)").unwrap();
        assert!(x1.importance > 0.95);
        let slope = result.averaged.iter().find(|a| a.parameter == "psi(x1)").unwrap();
        assert!(slope.estimate > 0.4 && slope.estimate < 2.5);
        assert!(result.averaged.iter().any(|a| a.parameter == "p(w)"));

        let gof = result.gof.unwrap();
        assert_eq!(gof.model, "~ w ~ x1 + x2");
        assert!(gof.valid_simulations > 0);
        assert!(result.null_model.aicc > result.occupancy_selection.ranking[0].aicc);
    }

    #[test]
    fn test_too_few_detection_sites() {
        let m = synthetic("rare", 30, 9);
        let s = SpeciesSettings {
            min_detection_sites: 31,
            ..settings(0)
        };
        assert!(matches!(
            fit_species(&m, &MaximumLikelihood::default(), &s),
            Err(Error::InvalidParameter { .. })
        ));
    }

    /// Fails every fit of one species
    struct FailFor(&'static str);

    impl OccupancyFitter for FailFor {
        fn fit(&self, matrix: &DetectionMatrix, spec: &ModelSpec) -> Result<FittedModel> {
            if matrix.species == self.0 {
                return Err(Error::Convergence {
                    iterations: 500,
                    gradient_norm: 0.3,
                });
            }
            MaximumLikelihood::default().fit(matrix, spec)
        }
    }

    #[test]
    fn test_batch_survives_species_failures() {
        let species: Vec<String> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut seen = Vec::new();
        let batch = fit_all_species(
            &species,
            |name| {
                if name == "delta" {
                    Err(Error::MissingColumn("bio1".into()))
                } else {
                    Ok(synthetic(name, 150, name.bytes().map(u64::from).sum()))
                }
            },
            &FailFor("beta"),
            &settings(0),
            |name, outcome| seen.push((name.to_string(), outcome.is_ok())),
        );

        assert_eq!(batch.results.keys().collect::<Vec<_>>(), vec!["alpha", "gamma"]);
        assert!(batch.failures["beta"].contains("converge"));
        assert!(batch.failures["delta"].contains("bio1"));
        // each species was fitted on its own data
        assert_eq!(batch.results["gamma"].species, "gamma");
        assert_ne!(
            batch.results["alpha"].null_model.log_likelihood,
            batch.results["gamma"].null_model.log_likelihood
        );
        assert_eq!(seen.len(), 4);
        assert!(batch.results["alpha"].gof.is_none());
    }
}
