//! MacKenzie–Bailey goodness of fit
//!
//! Sites are grouped into cohorts by which visits were observed. Within a
//! cohort the observed frequency of every detection history is compared
//! with its expected frequency under the fitted model; the Pearson
//! statistic summed over cohorts is referred to its parametric-bootstrap
//! distribution. ĉ = observed / mean simulated statistic.

use super::detection::DetectionMatrix;
use super::fit::{FittedModel, OccupancyFitter};
use super::serde_float::nullable;
use birdocc_core::Result;
use birdocc_parallel::{ParallelStrategy, ProcessingMode};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GofResult {
    /// Formula of the tested model
    pub model: String,
    pub chi_square: f64,
    #[serde(deserialize_with = "nullable")]
    pub p_value: f64,
    #[serde(deserialize_with = "nullable")]
    pub c_hat: f64,
    #[serde(deserialize_with = "nullable")]
    pub mean_simulated: f64,
    pub simulations: usize,
    /// Simulations whose refit succeeded
    pub valid_simulations: usize,
}

/// Probability of detection history `history` (bits over visits in
/// `mask`) at a site with occupancy `psi` and detection `p`.
fn history_probability(psi: f64, p: ArrayView1<'_, f64>, mask: u32, history: u32) -> f64 {
    let mut detect = 1.0;
    for (j, pj) in p.iter().enumerate() {
        if mask & (1 << j) == 0 {
            continue;
        }
        detect *= if history & (1 << j) != 0 { *pj } else { 1.0 - pj };
    }
    psi * detect + if history == 0 { 1.0 - psi } else { 0.0 }
}

/// Pearson chi-square of detection-history frequencies, summed over
/// missing-visit cohorts.
///
/// Expected counts of the unobserved histories of a cohort sum to the
/// cohort size minus the expected counts of its observed histories, so only
/// observed histories are enumerated.
pub fn mb_chi_square(y: &Array2<f64>, psi: &Array1<f64>, p: &Array2<f64>) -> f64 {
    let mut cohorts: BTreeMap<u32, Vec<(usize, u32)>> = BTreeMap::new();
    for (i, row) in y.rows().into_iter().enumerate() {
        let (mut mask, mut history) = (0u32, 0u32);
        for (j, v) in row.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            mask |= 1 << j;
            if *v > 0.5 {
                history |= 1 << j;
            }
        }
        if mask != 0 {
            cohorts.entry(mask).or_default().push((i, history));
        }
    }

    let mut chi = 0.0;
    for (mask, sites) in &cohorts {
        let mut observed: BTreeMap<u32, usize> = BTreeMap::new();
        for (_, h) in sites {
            *observed.entry(*h).or_default() += 1;
        }
        let mut expected_observed = 0.0;
        for (&h, &count) in &observed {
            let expected: f64 = sites
                .iter()
                .map(|&(i, _)| history_probability(psi[i], p.row(i), *mask, h))
                .sum();
            let expected = expected.max(f64::MIN_POSITIVE);
            chi += (count as f64 - expected).powi(2) / expected;
            expected_observed += expected;
        }
        chi += (sites.len() as f64 - expected_observed).max(0.0);
    }
    chi
}

/// Detections drawn from the fitted ψ and p, keeping the missing-visit mask
fn simulate(y: &Array2<f64>, psi: &Array1<f64>, p: &Array2<f64>, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = y.clone();
    for (i, mut row) in out.rows_mut().into_iter().enumerate() {
        let occupied = rng.gen::<f64>() < psi[i];
        for (j, v) in row.iter_mut().enumerate() {
            let u = rng.gen::<f64>();
            if !v.is_nan() {
                *v = if occupied && u < p[(i, j)] { 1.0 } else { 0.0 };
            }
        }
    }
    out
}

/// Parametric-bootstrap MacKenzie–Bailey test of `model`.
///
/// Simulation `s` draws with seed `seed + s`, so results do not depend on
/// the number of threads. Simulations whose refit fails are skipped.
pub fn mb_gof_test<F>(
    matrix: &DetectionMatrix,
    model: &FittedModel,
    fitter: &F,
    simulations: usize,
    seed: u64,
    mode: ProcessingMode,
) -> Result<GofResult>
where
    F: OccupancyFitter + ?Sized,
{
    let (psi, p) = model.predict(matrix)?;
    let chi_square = mb_chi_square(&matrix.y, &psi, &p);

    let draws: Vec<Option<f64>> = mode.par_map(0..simulations, |s| {
        let y = simulate(&matrix.y, &psi, &p, seed.wrapping_add(s as u64));
        let simulated = matrix.with_detections(y).ok()?;
        let refit = fitter.fit(&simulated, &model.spec).ok()?;
        let (psi_s, p_s) = refit.predict(&simulated).ok()?;
        Some(mb_chi_square(&simulated.y, &psi_s, &p_s))
    });
    let valid: Vec<f64> = draws.into_iter().flatten().collect();
    if valid.len() < simulations {
        warn!(
            "{}: {} of {} GOF simulations failed to refit",
            matrix.species,
            simulations - valid.len(),
            simulations
        );
    }

    let (p_value, mean_simulated, c_hat) = if valid.is_empty() {
        (f64::NAN, f64::NAN, f64::NAN)
    } else {
        let n = valid.len() as f64;
        let exceed = valid.iter().filter(|v| **v >= chi_square).count() as f64;
        let mean = valid.iter().sum::<f64>() / n;
        (exceed / n, mean, chi_square / mean)
    };
    info!(
        "{}: MB GOF chi-square {:.2}, p = {:.3}, c-hat = {:.2}",
        matrix.species, chi_square, p_value, c_hat
    );

    Ok(GofResult {
        model: model.formula.clone(),
        chi_square,
        p_value,
        c_hat,
        mean_simulated,
        simulations,
        valid_simulations: valid.len(),
    })
}
