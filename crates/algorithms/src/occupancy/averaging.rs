//! Multimodel inference over the top-model set

use super::model::parameter_name;
use super::selection::{ModelSelection, RankedModel};
use super::serde_float::nullable;
use crate::special::two_sided_p;
use birdocc_core::records::Submodel;
use birdocc_core::{AveragingMethod, Error, Result};
use serde::{Deserialize, Serialize};

/// Two-sided 95% normal quantile
pub const Z_95: f64 = 1.959_963_984_540_054;

/// Model-averaged (or single-model) coefficient. The schema is the same
/// whether one or several models are averaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedEstimate {
    pub parameter: String,
    pub submodel: Submodel,
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub conf_low: f64,
    pub conf_high: f64,
    #[serde(deserialize_with = "nullable")]
    pub z_value: f64,
    #[serde(deserialize_with = "nullable")]
    pub p_value: f64,
}

impl AveragedEstimate {
    fn new(submodel: Submodel, term: &str, estimate: f64, std_error: f64) -> Self {
        let z_value = estimate / std_error;
        Self {
            parameter: parameter_name(submodel, term),
            submodel,
            term: term.to_string(),
            estimate,
            std_error,
            conf_low: estimate - Z_95 * std_error,
            conf_high: estimate + Z_95 * std_error,
            z_value,
            p_value: two_sided_p(z_value),
        }
    }
}

/// Average the coefficients of the models with Δ < `threshold`.
///
/// A single top model reports its own estimates and standard errors.
/// Otherwise weights are renormalized over the top set and
///
/// ```text
/// β̄  = Σ wᵢ βᵢ
/// SE = sqrt(Σ wᵢ (seᵢ² + (βᵢ - β̄)²))
/// ```
///
/// Under [`AveragingMethod::Conditional`] each parameter is averaged over
/// the top models containing it; under [`AveragingMethod::Full`] models
/// lacking it contribute β = 0, se = 0. Parameters appear in the global
/// model's estimation order.
pub fn model_average(
    selection: &ModelSelection,
    threshold: f64,
    method: AveragingMethod,
) -> Result<Vec<AveragedEstimate>> {
    let top: Vec<&RankedModel> = selection.top_models(threshold);
    let models = top
        .iter()
        .map(|r| {
            selection
                .model(r)
                .map(|m| (r.weight, m))
                .ok_or_else(|| Error::Algorithm(format!("ranked model {} has no fit", r.formula)))
        })
        .collect::<Result<Vec<_>>>()?;
    if models.is_empty() {
        return Err(Error::Algorithm(format!(
            "no model within delta {} of the best",
            threshold
        )));
    }

    let parameters = selection.global.parameters();
    if let [(_, only)] = models.as_slice() {
        return Ok(parameters
            .iter()
            .filter_map(|(submodel, term)| {
                only.coefficient(&parameter_name(*submodel, term))
                    .map(|c| AveragedEstimate::new(*submodel, term, c.estimate, c.std_error))
            })
            .collect());
    }

    let total: f64 = models.iter().map(|(w, _)| w).sum();
    let mut out = Vec::new();
    for (submodel, term) in &parameters {
        let name = parameter_name(*submodel, term);
        if !models.iter().any(|(_, m)| m.contains(&name)) {
            continue;
        }
        let entries: Vec<(f64, f64, f64)> = models
            .iter()
            .filter_map(|(w, m)| match (m.coefficient(&name), method) {
                (Some(c), _) => Some((w / total, c.estimate, c.std_error)),
                (None, AveragingMethod::Full) => Some((w / total, 0.0, 0.0)),
                (None, AveragingMethod::Conditional) => None,
            })
            .collect();
        let w_sum: f64 = entries.iter().map(|(w, _, _)| w).sum();
        let estimate = entries.iter().map(|(w, b, _)| w * b).sum::<f64>() / w_sum;
        let variance = entries
            .iter()
            .map(|(w, b, se)| w * (se * se + (b - estimate).powi(2)))
            .sum::<f64>()
            / w_sum;
        let std_error = variance.sqrt();
        out.push(AveragedEstimate::new(*submodel, term, estimate, std_error));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::fit::FittedModel;
    use crate::occupancy::model::ModelSpec;
    use crate::occupancy::selection::{Candidate, CandidateFit};
    use approx::assert_relative_eq;

    fn candidate(mask: u32, occ: &[&str], estimates: &[f64], aicc: f64) -> Candidate {
        let spec = ModelSpec::new(vec![], occ.iter().map(|s| s.to_string()).collect());
        let ses = vec![0.2; estimates.len()];
        let mut model = FittedModel::new(spec.clone(), estimates, &ses, -50.0, 100, 10).unwrap();
        model.aicc = aicc;
        Candidate {
            mask,
            formula: spec.formula(),
            spec,
            fit: CandidateFit::Fitted(model),
        }
    }

    fn selection(aicc: [f64; 2]) -> ModelSelection {
        let global = ModelSpec::new(vec![], vec!["A".into()]);
        ModelSelection::new(
            global,
            Submodel::State,
            vec![
                // psi(Int), p(Int)
                candidate(0, &[], &[0.5, -1.0], aicc[0]),
                // psi(Int), psi(A), p(Int)
                candidate(1, &["A"], &[0.3, 1.0, -0.8], aicc[1]),
            ],
        )
        .unwrap()
    }

    /// Field names, sorted
    fn schema(v: &AveragedEstimate) -> Vec<String> {
        let mut keys: Vec<String> = match serde_json::to_value(v).unwrap() {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => vec![],
        };
        keys.sort();
        keys
    }

    #[test]
    fn test_single_top_model_uses_native_estimates() {
        let sel = selection([0.0, 10.0]);
        let avg = model_average(&sel, 2.0, AveragingMethod::Conditional).unwrap();
        let names: Vec<&str> = avg.iter().map(|a| a.parameter.as_str()).collect();
        assert_eq!(names, vec!["psi(Int)", "p(Int)"]);
        assert_eq!(avg[0].estimate, 0.5);
        assert_eq!(avg[0].std_error, 0.2);
        assert_relative_eq!(avg[0].conf_low, 0.5 - Z_95 * 0.2);
        assert_relative_eq!(avg[0].z_value, 2.5);
    }

    #[test]
    fn test_schema_matches_between_paths() {
        let single = model_average(&selection([0.0, 10.0]), 2.0, AveragingMethod::Conditional).unwrap();
        let multi = model_average(&selection([0.0, 1.0]), 2.0, AveragingMethod::Conditional).unwrap();
        assert_eq!(schema(&single[0]), schema(&multi[0]));
        assert_eq!(
            schema(&multi[0]),
            vec![
                "conf_high",
                "conf_low",
                "estimate",
                "p_value",
                "parameter",
                "std_error",
                "submodel",
                "term",
                "z_value"
            ]
        );
        // multi-model output keeps global estimation order
        let names: Vec<&str> = multi.iter().map(|a| a.parameter.as_str()).collect();
        assert_eq!(names, vec!["psi(Int)", "psi(A)", "p(Int)"]);
    }

    #[test]
    fn test_conditional_and_full_averages() {
        let sel = selection([0.0, 1.0]);
        let w1 = 1.0 / (1.0 + (-0.5_f64).exp());
        let w2 = 1.0 - w1;

        let cond = model_average(&sel, 2.0, AveragingMethod::Conditional).unwrap();
        let int = &cond[0];
        let mean = w1 * 0.5 + w2 * 0.3;
        assert_relative_eq!(int.estimate, mean, epsilon = 1e-12);
        let se = (w1 * (0.04 + (0.5 - mean).powi(2)) + w2 * (0.04 + (0.3 - mean).powi(2))).sqrt();
        assert_relative_eq!(int.std_error, se, epsilon = 1e-12);
        // only one model carries A
        assert_relative_eq!(cond[1].estimate, 1.0, epsilon = 1e-12);
        assert_relative_eq!(cond[1].std_error, 0.2, epsilon = 1e-12);

        let full = model_average(&sel, 2.0, AveragingMethod::Full).unwrap();
        assert_relative_eq!(full[1].estimate, w2, epsilon = 1e-12);
        let se_full = (w1 * w2 * w2 + w2 * (0.04 + (1.0 - w2).powi(2))).sqrt();
        assert_relative_eq!(full[1].std_error, se_full, epsilon = 1e-12);
    }
}
