//! Exhaustive submodel search and AICc ranking

use super::detection::DetectionMatrix;
use super::fit::{FittedModel, OccupancyFitter};
use super::model::{parameter_name, ModelSpec, INTERCEPT};
use super::serde_float::unbounded;
use birdocc_core::records::Submodel;
use birdocc_core::{Error, Result};
use birdocc_parallel::{ParallelStrategy, ProcessingMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Largest number of terms searched exhaustively (2^12 fits)
pub const MAX_DREDGE_TERMS: usize = 12;

/// Default ΔAICc cut-off for the top-model set
pub const DEFAULT_DELTA: f64 = 2.0;

/// Outcome of one candidate fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CandidateFit {
    Fitted(FittedModel),
    Failed { message: String },
}

/// One subset of the varied terms. Bit i of `mask` includes the i-th term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub mask: u32,
    pub spec: ModelSpec,
    pub formula: String,
    pub fit: CandidateFit,
}

impl Candidate {
    pub fn fitted(&self) -> Option<&FittedModel> {
        match &self.fit {
            CandidateFit::Fitted(m) => Some(m),
            CandidateFit::Failed { .. } => None,
        }
    }
}

/// A successful candidate in AICc order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    /// Index into [`ModelSelection::candidates`]
    pub candidate: usize,
    pub formula: String,
    pub k: usize,
    pub log_likelihood: f64,
    #[serde(deserialize_with = "unbounded")]
    pub aicc: f64,
    #[serde(deserialize_with = "unbounded")]
    pub delta: f64,
    /// Akaike weight over all successful candidates
    pub weight: f64,
}

/// Summed Akaike weight of the candidates containing a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Importance {
    pub parameter: String,
    pub submodel: Submodel,
    pub term: String,
    pub importance: f64,
    /// Successful candidates containing the parameter
    pub n_models: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub global: ModelSpec,
    pub varied: Submodel,
    pub candidates: Vec<Candidate>,
    pub ranking: Vec<RankedModel>,
}

/// Akaike weights exp(-Δ/2) / Σ exp(-Δ/2) for criterion values `aicc`
pub fn akaike_weights(aicc: &[f64]) -> Vec<f64> {
    let best = aicc.iter().copied().fold(f64::INFINITY, f64::min);
    let raw: Vec<f64> = aicc.iter().map(|a| (-(a - best) / 2.0).exp()).collect();
    let total: f64 = raw.iter().sum();
    raw.iter().map(|w| w / total).collect()
}

impl ModelSelection {
    /// Rank `candidates`; fails when none was fitted with a finite AICc.
    pub fn new(global: ModelSpec, varied: Submodel, candidates: Vec<Candidate>) -> Result<Self> {
        let fitted: Vec<(usize, &FittedModel)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.fitted().map(|m| (i, m)))
            .collect();
        if !fitted.iter().any(|(_, m)| m.aicc.is_finite()) {
            return Err(Error::Algorithm(format!(
                "none of {} candidate models has a finite AICc ({} failed)",
                candidates.len(),
                candidates.len() - fitted.len()
            )));
        }

        let aiccs: Vec<f64> = fitted.iter().map(|(_, m)| m.aicc).collect();
        let best = aiccs.iter().copied().fold(f64::INFINITY, f64::min);
        let weights = akaike_weights(&aiccs);
        let mut ranking: Vec<RankedModel> = fitted
            .iter()
            .zip(weights)
            .map(|(&(i, m), weight)| RankedModel {
                candidate: i,
                formula: m.formula.clone(),
                k: m.k,
                log_likelihood: m.log_likelihood,
                aicc: m.aicc,
                delta: m.aicc - best,
                weight,
            })
            .collect();
        ranking.sort_by(|a, b| a.aicc.total_cmp(&b.aicc).then(a.candidate.cmp(&b.candidate)));

        Ok(Self {
            global,
            varied,
            candidates,
            ranking,
        })
    }

    pub fn n_failed(&self) -> usize {
        self.candidates.len() - self.ranking.len()
    }

    pub fn model(&self, ranked: &RankedModel) -> Option<&FittedModel> {
        self.candidates[ranked.candidate].fitted()
    }

    /// Lowest-AICc model
    pub fn best(&self) -> Option<&FittedModel> {
        self.ranking.first().and_then(|r| self.model(r))
    }

    /// The fitted global model, if it converged
    pub fn global_fit(&self) -> Option<&FittedModel> {
        self.candidates
            .iter()
            .find(|c| c.spec == self.global)
            .and_then(Candidate::fitted)
    }

    /// Ranked models with Δ < `threshold`
    pub fn top_models(&self, threshold: f64) -> Vec<&RankedModel> {
        self.ranking.iter().filter(|r| r.delta < threshold).collect()
    }

    /// Importance of every non-intercept parameter of the global model,
    /// in estimation order
    pub fn importance(&self) -> Vec<Importance> {
        self.global
            .parameters()
            .into_iter()
            .filter(|(_, term)| term != INTERCEPT)
            .map(|(submodel, term)| {
                let parameter = parameter_name(submodel, &term);
                let (importance, n_models) = self
                    .ranking
                    .iter()
                    .filter(|r| self.model(r).is_some_and(|m| m.contains(&parameter)))
                    .fold((0.0, 0), |(w, n), r| (w + r.weight, n + 1));
                Importance {
                    parameter,
                    submodel,
                    term,
                    importance,
                    n_models,
                }
            })
            .collect()
    }
}

/// Spec of subset `mask` of the `vary` terms of `global`
pub fn subset_spec(global: &ModelSpec, vary: Submodel, mask: u32) -> ModelSpec {
    let terms = global
        .terms(vary)
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, t)| t.clone())
        .collect();
    global.with_terms(vary, terms)
}

/// Fit all 2^k subsets of the `vary` terms of `global`, the other
/// submodel held at its global terms. Candidates come back in mask order;
/// failed fits stay in the set as [`CandidateFit::Failed`].
pub fn dredge<F>(
    matrix: &DetectionMatrix,
    global: &ModelSpec,
    vary: Submodel,
    fitter: &F,
    mode: ProcessingMode,
) -> Result<ModelSelection>
where
    F: OccupancyFitter + ?Sized,
{
    let k = global.terms(vary).len();
    if k > MAX_DREDGE_TERMS {
        return Err(Error::InvalidParameter {
            name: "terms",
            value: k.to_string(),
            reason: format!("at most {} terms are searched exhaustively", MAX_DREDGE_TERMS),
        });
    }

    let n = 1usize << k;
    let candidates = mode.par_map(0..n, |mask| {
        let spec = subset_spec(global, vary, mask as u32);
        let fit = match fitter.fit(matrix, &spec) {
            Ok(model) => CandidateFit::Fitted(model),
            Err(e) => {
                debug!("{}: {} failed: {}", matrix.species, spec.formula(), e);
                CandidateFit::Failed {
                    message: e.to_string(),
                }
            }
        };
        Candidate {
            mask: mask as u32,
            formula: spec.formula(),
            spec,
            fit,
        }
    });

    let selection = ModelSelection::new(global.clone(), vary, candidates)?;
    if selection.n_failed() > 0 {
        warn!(
            "{}: {} of {} {} submodels failed",
            matrix.species,
            selection.n_failed(),
            n,
            vary
        );
    }
    info!(
        "{}: {} submodels over {} {} terms, best {}",
        matrix.species,
        n,
        k,
        vary,
        selection.ranking[0].formula
    );
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// Assigns AICc values by submodel mask; mask 7 fails to converge
    struct ScriptedFitter {
        aicc: Vec<f64>,
        fail_mask: Option<u32>,
    }

    impl OccupancyFitter for ScriptedFitter {
        fn fit(&self, _matrix: &DetectionMatrix, spec: &ModelSpec) -> Result<FittedModel> {
            let mask = ["A", "B", "C"]
                .iter()
                .enumerate()
                .filter(|(_, t)| spec.occ_terms.iter().any(|o| o == *t))
                .fold(0u32, |m, (i, _)| m | (1 << i));
            if Some(mask) == self.fail_mask {
                return Err(Error::Convergence {
                    iterations: 500,
                    gradient_norm: 1.0,
                });
            }
            let k = spec.n_params();
            let values: Vec<f64> = (0..k).map(|i| 0.1 * (i as f64 + 1.0)).collect();
            let mut model = FittedModel::new(spec.clone(), &values, &vec![0.05; k], -10.0, 100, 1)?;
            model.aicc = self.aicc[mask as usize];
            Ok(model)
        }
    }

    fn matrix() -> DetectionMatrix {
        DetectionMatrix {
            species: "synthetic".into(),
            site_ids: vec![],
            y: Array2::zeros((0, 0)),
            site_covariates: vec![],
            site_data: Array2::zeros((0, 0)),
            visit_covariates: vec![],
            visit_data: vec![],
            scaling: vec![],
        }
    }

    fn global() -> ModelSpec {
        ModelSpec::new(vec!["expertise".into()], vec!["A".into(), "B".into(), "C".into()])
    }

    fn scripted(fail_mask: Option<u32>) -> ModelSelection {
        let fitter = ScriptedFitter {
            aicc: vec![0.0, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0],
            fail_mask,
        };
        dredge(&matrix(), &global(), Submodel::State, &fitter, ProcessingMode::Sequential).unwrap()
    }

    #[test]
    fn test_exhaustive_search_size_and_order() {
        let sel = scripted(None);
        assert_eq!(sel.candidates.len(), 8);
        let masks: Vec<u32> = sel.candidates.iter().map(|c| c.mask).collect();
        assert_eq!(masks, (0..8).collect::<Vec<_>>());
        assert_eq!(sel.candidates[5].spec.occ_terms, vec!["A", "C"]);
        // detection terms are held fixed
        assert!(sel.candidates.iter().all(|c| c.spec.det_terms == vec!["expertise"]));
    }

    #[test]
    fn test_top_set_and_weights() {
        let sel = scripted(None);
        let top = sel.top_models(2.0);
        let masks: Vec<u32> = top.iter().map(|r| sel.candidates[r.candidate].mask).collect();
        assert_eq!(masks, vec![0, 1, 2]);

        let total: f64 = sel.ranking.iter().map(|r| r.weight).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert!(sel.ranking.iter().all(|r| r.weight >= 0.0));
        let top_weight: f64 = top.iter().map(|r| r.weight).sum();
        assert!(top_weight > 0.5);
        assert_eq!(sel.best().unwrap().formula, "~ expertise ~ 1");
    }

    #[test]
    fn test_threshold_is_monotone() {
        let sel = scripted(None);
        let sizes: Vec<usize> = [0.5, 1.0, 1.6, 2.0, 2.5, 10.0]
            .iter()
            .map(|t| sel.top_models(*t).len())
            .collect();
        assert_eq!(sizes, vec![1, 1, 3, 3, 4, 8]);
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_importance() {
        let sel = scripted(None);
        let imp = sel.importance();
        let names: Vec<&str> = imp.iter().map(|i| i.parameter.as_str()).collect();
        assert_eq!(names, vec!["psi(A)", "psi(B)", "psi(C)", "p(expertise)"]);

        // in every candidate
        assert_relative_eq!(imp[3].importance, 1.0, epsilon = 1e-12);
        assert_eq!(imp[3].n_models, 8);

        let weights = akaike_weights(&[0.0, 1.0, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let with_a: f64 = [1, 3, 5, 7].iter().map(|m| weights[*m]).sum();
        assert_relative_eq!(imp[0].importance, with_a, epsilon = 1e-12);
        assert!(imp.iter().all(|i| i.importance <= 1.0 + 1e-12));
    }

    #[test]
    fn test_failed_candidates_are_kept() {
        let sel = scripted(Some(7));
        assert_eq!(sel.candidates.len(), 8);
        assert_eq!(sel.n_failed(), 1);
        assert!(matches!(sel.candidates[7].fit, CandidateFit::Failed { .. }));
        assert!(sel.global_fit().is_none());
        let total: f64 = sel.ranking.iter().map(|r| r.weight).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unbounded_rank_reads_back_infinite() {
        let r = RankedModel {
            candidate: 3,
            formula: "~ 1 ~ a + b".into(),
            k: 4,
            log_likelihood: -2.5,
            aicc: f64::INFINITY,
            delta: f64::INFINITY,
            weight: 0.0,
        };
        let back: RankedModel = serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_all_failures_is_an_error() {
        struct Failing;
        impl OccupancyFitter for Failing {
            fn fit(&self, _: &DetectionMatrix, _: &ModelSpec) -> Result<FittedModel> {
                Err(Error::Unidentifiable("test".into()))
            }
        }
        let res = dredge(&matrix(), &global(), Submodel::State, &Failing, ProcessingMode::Sequential);
        assert!(res.is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let fitter = ScriptedFitter {
            aicc: vec![3.0, 1.0, 4.0, 1.5, 5.0, 9.0, 2.0, 6.0],
            fail_mask: None,
        };
        let seq = dredge(&matrix(), &global(), Submodel::State, &fitter, ProcessingMode::Sequential).unwrap();
        let par = dredge(&matrix(), &global(), Submodel::State, &fitter, ProcessingMode::ParallelWith(3)).unwrap();
        assert_eq!(seq, par);
    }
}
