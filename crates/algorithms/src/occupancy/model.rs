//! Model specifications and parameter naming

use birdocc_core::records::Submodel;
use serde::{Deserialize, Serialize};

/// Intercept term name
pub const INTERCEPT: &str = "Int";

/// `psi(bio1)`, `p(Int)`, ...
pub fn parameter_name(submodel: Submodel, term: &str) -> String {
    format!("{}({})", submodel.label(), term)
}

/// Covariates entering each linear predictor; intercepts are implicit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub det_terms: Vec<String>,
    pub occ_terms: Vec<String>,
}

impl ModelSpec {
    pub fn new(det_terms: Vec<String>, occ_terms: Vec<String>) -> Self {
        Self {
            det_terms,
            occ_terms,
        }
    }

    /// Intercept-only model, `~1 ~1`
    pub fn null() -> Self {
        Self::default()
    }

    pub fn terms(&self, submodel: Submodel) -> &[String] {
        match submodel {
            Submodel::State => &self.occ_terms,
            Submodel::Det => &self.det_terms,
        }
    }

    /// Copy with the terms of `submodel` replaced
    pub fn with_terms(&self, submodel: Submodel, terms: Vec<String>) -> Self {
        let mut spec = self.clone();
        match submodel {
            Submodel::State => spec.occ_terms = terms,
            Submodel::Det => spec.det_terms = terms,
        }
        spec
    }

    /// Occupancy coefficients, intercept included
    pub fn n_occ(&self) -> usize {
        self.occ_terms.len() + 1
    }

    /// Detection coefficients, intercept included
    pub fn n_det(&self) -> usize {
        self.det_terms.len() + 1
    }

    pub fn n_params(&self) -> usize {
        self.n_occ() + self.n_det()
    }

    /// (submodel, term) of every parameter in estimation order: occupancy
    /// intercept and terms, then detection intercept and terms.
    pub fn parameters(&self) -> Vec<(Submodel, String)> {
        let mut out = Vec::with_capacity(self.n_params());
        for (submodel, terms) in [(Submodel::State, &self.occ_terms), (Submodel::Det, &self.det_terms)] {
            out.push((submodel, INTERCEPT.to_string()));
            out.extend(terms.iter().map(|t| (submodel, t.clone())));
        }
        out
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters()
            .into_iter()
            .map(|(s, t)| parameter_name(s, &t))
            .collect()
    }

    /// Double right-hand-side formula, detection first: `~ expertise ~ bio1 + lc_forest`
    pub fn formula(&self) -> String {
        let side = |terms: &[String]| {
            if terms.is_empty() {
                "1".to_string()
            } else {
                terms.join(" + ")
            }
        };
        format!("~ {} ~ {}", side(&self.det_terms), side(&self.occ_terms))
    }
}
