//! Site × visit detection histories with their covariates

use birdocc_core::config::{MAX_OCC_COVARIATES, MAX_VISITS};
use birdocc_core::io::CovariateTable;
use birdocc_core::records::VisitRecord;
use birdocc_core::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayViewMut, Dimension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Centre and scale applied to a covariate before fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub covariate: String,
    pub mean: f64,
    /// 1.0 when the column was constant and only centred
    pub sd: f64,
}

/// Input of one single-species occupancy fit.
///
/// `y[(i, j)]` is 1.0 (detected), 0.0 (not detected) or NaN (no visit, or
/// a visit whose covariates are missing). Covariates are z-standardized;
/// visit covariates are NaN exactly where `y` is.
#[derive(Debug, Clone)]
pub struct DetectionMatrix {
    pub species: String,
    pub site_ids: Vec<String>,
    pub y: Array2<f64>,
    pub site_covariates: Vec<String>,
    /// sites × site covariates
    pub site_data: Array2<f64>,
    pub visit_covariates: Vec<String>,
    /// one sites × visits array per visit covariate
    pub visit_data: Vec<Array2<f64>>,
    pub scaling: Vec<Scaling>,
}

impl DetectionMatrix {
    pub fn n_sites(&self) -> usize {
        self.y.nrows()
    }

    pub fn n_visits(&self) -> usize {
        self.y.ncols()
    }

    /// Number of observed (non-missing) visits
    pub fn n_observations(&self) -> usize {
        self.y.iter().filter(|v| !v.is_nan()).count()
    }

    /// Sites with at least one detection
    pub fn n_detection_sites(&self) -> usize {
        self.y
            .rows()
            .into_iter()
            .filter(|row| row.iter().any(|v| *v == 1.0))
            .count()
    }

    pub fn naive_occupancy(&self) -> f64 {
        self.n_detection_sites() as f64 / self.n_sites().max(1) as f64
    }

    pub fn site_covariate(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.site_covariates
            .iter()
            .position(|c| c == name)
            .map(|j| self.site_data.column(j))
    }

    pub fn visit_covariate(&self, name: &str) -> Option<&Array2<f64>> {
        self.visit_covariates
            .iter()
            .position(|c| c == name)
            .map(|j| &self.visit_data[j])
    }

    /// Same sites, covariates and missing-visit mask with new detections
    pub fn with_detections(&self, y: Array2<f64>) -> Result<Self> {
        if y.dim() != self.y.dim() {
            return Err(Error::SizeMismatch {
                er: self.y.nrows(),
                ec: self.y.ncols(),
                ar: y.nrows(),
                ac: y.ncols(),
            });
        }
        Ok(Self { y, ..self.clone() })
    }
}

/// z-standardize the finite entries of `values`; a constant column is
/// only centred.
fn standardize<D: Dimension>(name: &str, mut values: ArrayViewMut<'_, f64, D>) -> Scaling {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len() as f64;
    let mean = if n > 0.0 { finite.iter().sum::<f64>() / n } else { 0.0 };
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    let mut sd = var.sqrt();
    if !(sd > 1e-12) {
        warn!("covariate '{}' is constant over the sampled sites; centred only", name);
        sd = 1.0;
    }
    values.mapv_inplace(|v| (v - mean) / sd);
    Scaling {
        covariate: name.to_string(),
        mean,
        sd,
    }
}

/// Build the detection matrix of `species`.
///
/// `visits` are the thinned visit records, `detected` the checklist ids on
/// which the species was reported, and `site_table` the buffer covariates.
/// Sites missing from the table or lacking any occupancy covariate are
/// dropped, as are sites left without an observed visit once visits with
/// missing detection covariates are masked.
pub fn build_detection_matrix(
    species: &str,
    visits: &[VisitRecord],
    detected: &HashSet<&str>,
    site_table: &CovariateTable,
    det_covariates: &[String],
    occ_covariates: &[String],
) -> Result<DetectionMatrix> {
    if occ_covariates.len() > MAX_OCC_COVARIATES {
        return Err(Error::InvalidParameter {
            name: "occ_covariates",
            value: occ_covariates.len().to_string(),
            reason: format!("at most {} occupancy covariates", MAX_OCC_COVARIATES),
        });
    }
    for name in det_covariates {
        if !VisitRecord::COVARIATES.contains(&name.as_str()) {
            return Err(Error::MissingColumn(name.clone()));
        }
    }
    let occ_columns: Vec<usize> = occ_covariates
        .iter()
        .map(|name| {
            site_table
                .column_index(name)
                .ok_or_else(|| Error::MissingColumn(name.clone()))
        })
        .collect::<Result<_>>()?;
    let table_rows = site_table.index();

    let mut by_site: BTreeMap<&str, Vec<&VisitRecord>> = BTreeMap::new();
    for v in visits {
        by_site.entry(v.site_id.as_str()).or_default().push(v);
    }
    let n_visits = visits.iter().map(|v| v.visit + 1).max().unwrap_or(0);
    if n_visits > MAX_VISITS {
        return Err(Error::InvalidParameter {
            name: "visit",
            value: n_visits.to_string(),
            reason: format!("at most {} visits per site", MAX_VISITS),
        });
    }

    let mut site_ids = Vec::new();
    let mut site_rows: Vec<Vec<f64>> = Vec::new();
    let mut histories: Vec<Vec<(f64, Vec<f64>)>> = Vec::new();
    let (mut no_covariates, mut no_visits) = (0usize, 0usize);

    for (site, records) in &by_site {
        let Some(&row) = table_rows.get(site) else {
            no_covariates += 1;
            continue;
        };
        let site_values: Vec<f64> = occ_columns.iter().map(|&j| site_table.row(row)[j]).collect();
        if site_values.iter().any(|v| !v.is_finite()) {
            no_covariates += 1;
            continue;
        }

        let mut history = vec![(f64::NAN, vec![f64::NAN; det_covariates.len()]); n_visits];
        let mut observed = 0;
        for r in records {
            let covs: Vec<f64> = det_covariates
                .iter()
                .map(|name| r.covariate(name).unwrap_or(f64::NAN))
                .collect();
            if covs.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let y = if detected.contains(r.checklist_id.as_str()) { 1.0 } else { 0.0 };
            history[r.visit] = (y, covs);
            observed += 1;
        }
        if observed == 0 {
            no_visits += 1;
            continue;
        }
        site_ids.push(site.to_string());
        site_rows.push(site_values);
        histories.push(history);
    }

    if no_covariates + no_visits > 0 {
        debug!(
            "{}: dropped {} sites without covariates and {} without usable visits",
            species, no_covariates, no_visits
        );
    }
    if site_ids.is_empty() {
        return Err(Error::Algorithm(format!("{}: no sites with usable visits", species)));
    }

    let n_sites = site_ids.len();
    let mut y = Array2::from_elem((n_sites, n_visits), f64::NAN);
    let mut visit_data = vec![Array2::from_elem((n_sites, n_visits), f64::NAN); det_covariates.len()];
    for (i, history) in histories.iter().enumerate() {
        for (j, (yij, covs)) in history.iter().enumerate() {
            y[(i, j)] = *yij;
            for (k, v) in covs.iter().enumerate() {
                visit_data[k][(i, j)] = *v;
            }
        }
    }
    let mut site_data = Array2::zeros((n_sites, occ_covariates.len()));
    for (i, row) in site_rows.iter().enumerate() {
        for (k, v) in row.iter().enumerate() {
            site_data[(i, k)] = *v;
        }
    }

    let mut scaling = Vec::new();
    for (k, name) in occ_covariates.iter().enumerate() {
        scaling.push(standardize(name, site_data.column_mut(k)));
    }
    for (k, name) in det_covariates.iter().enumerate() {
        scaling.push(standardize(name, visit_data[k].view_mut()));
    }

    Ok(DetectionMatrix {
        species: species.to_string(),
        site_ids,
        y,
        site_covariates: occ_covariates.to_vec(),
        site_data,
        visit_covariates: det_covariates.to_vec(),
        visit_data,
        scaling,
    })
}
