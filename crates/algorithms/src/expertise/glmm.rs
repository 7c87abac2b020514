//! Poisson GLMM with one random intercept, fitted by penalized IRLS.
//!
//! Model: y_i ~ Poisson(μ_i), log μ_i = x_i β + u_g(i), u_g ~ N(0, σ²).
//! Each iteration takes a Newton step on β with u as offset, a one-step
//! Newton update of every u_g on the penalized likelihood, then re-estimates
//! σ² from the conditional modes and their approximate variances.

use crate::linalg;
use birdocc_core::{Error, Result};
use ndarray::{Array1, Array2, Axis};

/// Response, fixed-effect design and grouping of one GLMM fit
#[derive(Debug, Clone)]
pub struct GlmmData {
    pub y: Array1<f64>,
    /// n x p, first column the intercept
    pub x: Array2<f64>,
    /// Group index of each row, in 0..n_groups
    pub group: Vec<usize>,
    pub n_groups: usize,
}

#[derive(Debug, Clone)]
pub struct GlmmFit {
    pub beta: Array1<f64>,
    pub beta_se: Array1<f64>,
    /// Conditional modes of the group intercepts
    pub u: Array1<f64>,
    pub sigma2: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Conditional Poisson log-likelihood at the modes
    pub log_likelihood: f64,
}

const SIGMA2_FLOOR: f64 = 1e-6;
const MAX_ETA: f64 = 30.0;

fn linear_predictor(data: &GlmmData, beta: &Array1<f64>, u: &Array1<f64>) -> Array1<f64> {
    let mut eta = data.x.dot(beta);
    for (e, &g) in eta.iter_mut().zip(&data.group) {
        *e = (*e + u[g]).min(MAX_ETA);
    }
    eta
}

fn poisson_loglik(y: &Array1<f64>, eta: &Array1<f64>) -> f64 {
    y.iter()
        .zip(eta.iter())
        .map(|(&y, &e)| y * e - e.exp() - crate::special::ln_factorial(y as u64))
        .sum()
}

/// Newton step on β holding `u` fixed, halved until the likelihood does
/// not decrease.
fn fixed_effect_step(data: &GlmmData, beta: &mut Array1<f64>, u: &Array1<f64>) -> Result<()> {
    let p = data.x.ncols();
    let eta = linear_predictor(data, beta, u);
    let mu = eta.mapv(f64::exp);
    let base = poisson_loglik(&data.y, &eta);

    let mut info = vec![0.0; p * p];
    let mut score = vec![0.0; p];
    for (i, row) in data.x.axis_iter(Axis(0)).enumerate() {
        let resid = data.y[i] - mu[i];
        for a in 0..p {
            score[a] += row[a] * resid;
            for b in 0..p {
                info[a * p + b] += mu[i] * row[a] * row[b];
            }
        }
    }
    let step = linalg::solve(p, &mut info, &mut score)
        .map_err(|_| Error::Unidentifiable("collinear expertise design".into()))?;
    let step = Array1::from(step);

    let mut scale = 1.0;
    for _ in 0..20 {
        let candidate = &*beta + &(&step * scale);
        let ll = poisson_loglik(&data.y, &linear_predictor(data, &candidate, u));
        if ll.is_finite() && ll >= base - 1e-10 {
            *beta = candidate;
            break;
        }
        scale *= 0.5;
    }
    Ok(())
}

/// Fixed-effect information XᵀWX
fn information(data: &GlmmData, beta: &Array1<f64>, u: &Array1<f64>) -> Array2<f64> {
    let mu = linear_predictor(data, beta, u).mapv(f64::exp);
    let weighted = &data.x * &mu.view().insert_axis(Axis(1));
    data.x.t().dot(&weighted)
}

/// Fit the model. Returns `converged = false` when `max_iterations` is
/// reached; numerical breakdown of the fixed-effect system is an error.
pub fn fit_poisson_glmm(data: &GlmmData, max_iterations: usize, tolerance: f64) -> Result<GlmmFit> {
    let n = data.y.len();
    let p = data.x.ncols();
    if n == 0 || p == 0 || data.x.nrows() != n || data.group.len() != n {
        return Err(Error::InvalidDimensions { width: p, height: n });
    }

    let mut beta = Array1::<f64>::zeros(p);
    beta[0] = (data.y.mean().unwrap_or(0.0) + 0.5).ln();
    let mut u = Array1::<f64>::zeros(data.n_groups);
    let mut sigma2 = 1.0;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iterations {
        iterations += 1;
        let beta_old = beta.clone();
        let u_old = u.clone();
        let sigma2_old = sigma2;

        fixed_effect_step(data, &mut beta, &u)?;

        let mu = linear_predictor(data, &beta, &u).mapv(f64::exp);
        let mut resid = vec![0.0; data.n_groups];
        let mut weight = vec![0.0; data.n_groups];
        for i in 0..n {
            resid[data.group[i]] += data.y[i] - mu[i];
            weight[data.group[i]] += mu[i];
        }
        for g in 0..data.n_groups {
            let h = weight[g] + 1.0 / sigma2;
            u[g] += (resid[g] - u[g] / sigma2) / h;
        }

        let mu = linear_predictor(data, &beta, &u).mapv(f64::exp);
        let mut weight = vec![0.0; data.n_groups];
        for i in 0..n {
            weight[data.group[i]] += mu[i];
        }
        let spread: f64 = (0..data.n_groups)
            .map(|g| u[g] * u[g] + 1.0 / (weight[g] + 1.0 / sigma2))
            .sum();
        sigma2 = (spread / data.n_groups.max(1) as f64).max(SIGMA2_FLOOR);

        if beta.iter().chain(u.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Convergence {
                iterations,
                gradient_norm: f64::NAN,
            });
        }

        let d_beta = (&beta - &beta_old).mapv(f64::abs).fold(0.0_f64, |m, v| m.max(*v));
        let d_u = (&u - &u_old).mapv(f64::abs).fold(0.0_f64, |m, v| m.max(*v));
        let d_sigma = (sigma2 - sigma2_old).abs() / sigma2_old.max(SIGMA2_FLOOR);
        if d_beta < tolerance && d_u < tolerance && d_sigma < tolerance {
            converged = true;
            break;
        }
    }

    let info = information(data, &beta, &u);
    let beta_se = linalg::invert(&info)
        .map(|cov| cov.diag().mapv(|v| if v > 0.0 { v.sqrt() } else { f64::NAN }))
        .unwrap_or_else(|_| Array1::from_elem(p, f64::NAN));
    let log_likelihood = poisson_loglik(&data.y, &linear_predictor(data, &beta, &u));

    Ok(GlmmFit {
        beta,
        beta_se,
        u,
        sigma2,
        iterations,
        converged,
        log_likelihood,
    })
}
