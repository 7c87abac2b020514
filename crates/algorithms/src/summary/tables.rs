//! Long-format summary tables, one row per species and item

use super::CollectedResults;
use crate::occupancy::{CandidateFit, ModelSelection, SpeciesResult};
use birdocc_core::records::Submodel;
use birdocc_core::AveragingMethod;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeciesRow {
    pub species: String,
    pub n_sites: usize,
    pub n_observations: usize,
    pub n_detection_sites: usize,
    pub naive_occupancy: f64,
    /// Detection formula carried into the occupancy search
    pub det_terms: String,
    pub best_model: String,
    pub n_top_models: usize,
    pub null_aicc: f64,
    pub best_aicc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoefficientRow {
    pub species: String,
    pub parameter: String,
    pub submodel: Submodel,
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub conf_low: f64,
    pub conf_high: f64,
    pub z_value: f64,
    pub p_value: f64,
    pub averaging: AveragingMethod,
    pub n_top_models: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceRow {
    pub species: String,
    pub parameter: String,
    pub term: String,
    pub importance: f64,
    pub n_models: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionRow {
    pub species: String,
    /// Submodel whose terms were searched
    pub varied: Submodel,
    pub formula: String,
    pub k: Option<usize>,
    pub log_likelihood: Option<f64>,
    pub aicc: Option<f64>,
    pub delta: Option<f64>,
    pub weight: Option<f64>,
    pub top_set: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GofRow {
    pub species: String,
    pub model: String,
    pub chi_square: f64,
    pub p_value: f64,
    pub c_hat: f64,
    pub simulations: usize,
    pub valid_simulations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRow {
    pub species: String,
    pub reason: String,
}

pub fn species_rows(results: &CollectedResults) -> Vec<SpeciesRow> {
    results
        .fitted()
        .map(|r| {
            let best = r.occupancy_selection.ranking.first();
            SpeciesRow {
                species: r.species.clone(),
                n_sites: r.n_sites,
                n_observations: r.n_observations,
                n_detection_sites: r.n_detection_sites,
                naive_occupancy: r.naive_occupancy,
                det_terms: if r.det_terms.is_empty() {
                    "1".to_string()
                } else {
                    r.det_terms.join(" + ")
                },
                best_model: best.map(|b| b.formula.clone()).unwrap_or_default(),
                n_top_models: r.top_models.len(),
                null_aicc: r.null_model.aicc,
                best_aicc: best.map_or(f64::NAN, |b| b.aicc),
            }
        })
        .collect()
}

pub fn coefficient_rows(results: &CollectedResults) -> Vec<CoefficientRow> {
    results
        .fitted()
        .flat_map(|r| {
            r.averaged.iter().map(move |a| CoefficientRow {
                species: r.species.clone(),
                parameter: a.parameter.clone(),
                submodel: a.submodel,
                term: a.term.clone(),
                estimate: a.estimate,
                std_error: a.std_error,
                conf_low: a.conf_low,
                conf_high: a.conf_high,
                z_value: a.z_value,
                p_value: a.p_value,
                averaging: r.averaging,
                n_top_models: r.top_models.len(),
            })
        })
        .collect()
}

pub fn importance_rows(results: &CollectedResults) -> Vec<ImportanceRow> {
    results
        .fitted()
        .flat_map(|r| {
            r.importance.iter().map(move |i| ImportanceRow {
                species: r.species.clone(),
                parameter: i.parameter.clone(),
                term: i.term.clone(),
                importance: i.importance,
                n_models: i.n_models,
            })
        })
        .collect()
}

fn ranking_rows(
    species: &str,
    selection: &ModelSelection,
    threshold: f64,
    out: &mut Vec<SelectionRow>,
) {
    for ranked in &selection.ranking {
        out.push(SelectionRow {
            species: species.to_string(),
            varied: selection.varied,
            formula: ranked.formula.clone(),
            k: Some(ranked.k),
            log_likelihood: Some(ranked.log_likelihood),
            aicc: Some(ranked.aicc),
            delta: Some(ranked.delta),
            weight: Some(ranked.weight),
            top_set: ranked.delta < threshold,
            error: None,
        });
    }
    for candidate in &selection.candidates {
        if let CandidateFit::Failed { message } = &candidate.fit {
            out.push(SelectionRow {
                species: species.to_string(),
                varied: selection.varied,
                formula: candidate.formula.clone(),
                k: None,
                log_likelihood: None,
                aicc: None,
                delta: None,
                weight: None,
                top_set: false,
                error: Some(message.clone()),
            });
        }
    }
}

/// Detection ranking then occupancy ranking, failed candidates after the
/// successful ones. `top_set` marks the models that were averaged.
pub fn selection_rows(results: &CollectedResults) -> Vec<SelectionRow> {
    let mut rows = Vec::new();
    for r in results.fitted() {
        // the detection search only picks terms; nothing there is averaged
        ranking_rows(&r.species, &r.detection_selection, f64::NEG_INFINITY, &mut rows);
        ranking_rows(&r.species, &r.occupancy_selection, r.delta_threshold, &mut rows);
    }
    rows
}

pub fn gof_rows(results: &CollectedResults) -> Vec<GofRow> {
    results
        .fitted()
        .filter_map(|r: &SpeciesResult| {
            r.gof.as_ref().map(|g| GofRow {
                species: r.species.clone(),
                model: g.model.clone(),
                chi_square: g.chi_square,
                p_value: g.p_value,
                c_hat: g.c_hat,
                simulations: g.simulations,
                valid_simulations: g.valid_simulations,
            })
        })
        .collect()
}

pub fn failure_rows(results: &CollectedResults) -> Vec<FailureRow> {
    results
        .missing()
        .map(|(species, reason)| FailureRow {
            species: species.to_string(),
            reason: reason.to_string(),
        })
        .collect()
}
