//! Single-season occupancy likelihood
//!
//! For site i with occupancy ψᵢ = σ(xᵢβ) and detection pᵢⱼ = σ(wᵢⱼα) on
//! its observed visits:
//!
//! ```text
//! Aᵢ = Πⱼ pᵢⱼ^yᵢⱼ (1 - pᵢⱼ)^(1 - yᵢⱼ)
//! Lᵢ = ψᵢ Aᵢ + (1 - ψᵢ) · [no detection at i]
//! ```
//!
//! With the posterior occupancy rᵢ = ψᵢAᵢ / Lᵢ the gradient of ln Lᵢ is
//! (rᵢ - ψᵢ) xᵢ for β and rᵢ Σⱼ (yᵢⱼ - pᵢⱼ) wᵢⱼ for α. Everything is
//! evaluated on the log scale.

use super::detection::DetectionMatrix;
use super::model::ModelSpec;
use crate::special::{log_add_exp, log_logistic, logistic};
use birdocc_core::{Error, Result};
use ndarray::{Array1, Array2, Array3};

/// Design matrices of one model on one detection matrix
#[derive(Debug, Clone)]
pub struct OccupancyDesign {
    /// sites × visits, NaN for missing
    pub y: Array2<f64>,
    /// sites × (1 + occupancy terms)
    pub x_occ: Array2<f64>,
    /// sites × visits × (1 + detection terms)
    pub x_det: Array3<f64>,
}

impl OccupancyDesign {
    pub fn new(matrix: &DetectionMatrix, spec: &ModelSpec) -> Result<Self> {
        let (n, j) = matrix.y.dim();

        let mut x_occ = Array2::ones((n, spec.n_occ()));
        for (k, term) in spec.occ_terms.iter().enumerate() {
            let column = matrix
                .site_covariate(term)
                .ok_or_else(|| Error::MissingColumn(term.clone()))?;
            x_occ.column_mut(k + 1).assign(&column);
        }

        let mut x_det = Array3::ones((n, j, spec.n_det()));
        for (k, term) in spec.det_terms.iter().enumerate() {
            let values = matrix
                .visit_covariate(term)
                .ok_or_else(|| Error::MissingColumn(term.clone()))?;
            for ((site, visit), v) in values.indexed_iter() {
                x_det[(site, visit, k + 1)] = *v;
            }
        }

        Ok(Self {
            y: matrix.y.clone(),
            x_occ,
            x_det,
        })
    }

    pub fn n_sites(&self) -> usize {
        self.y.nrows()
    }

    pub fn n_occ(&self) -> usize {
        self.x_occ.ncols()
    }

    pub fn n_params(&self) -> usize {
        self.x_occ.ncols() + self.x_det.dim().2
    }

    fn eta_occ(&self, beta: &[f64], site: usize) -> f64 {
        self.x_occ
            .row(site)
            .iter()
            .zip(beta)
            .map(|(x, b)| x * b)
            .sum()
    }

    fn eta_det(&self, alpha: &[f64], site: usize, visit: usize) -> f64 {
        alpha
            .iter()
            .enumerate()
            .map(|(k, a)| self.x_det[(site, visit, k)] * a)
            .sum()
    }

    /// Fitted ψ per site and p per site and visit (NaN where unobserved)
    pub fn probabilities(&self, theta: &[f64]) -> (Array1<f64>, Array2<f64>) {
        let (beta, alpha) = theta.split_at(self.n_occ());
        let (n, j) = self.y.dim();
        let psi = Array1::from_shape_fn(n, |i| logistic(self.eta_occ(beta, i)));
        let p = Array2::from_shape_fn((n, j), |(i, v)| {
            if self.y[(i, v)].is_nan() {
                f64::NAN
            } else {
                logistic(self.eta_det(alpha, i, v))
            }
        });
        (psi, p)
    }

    /// Negative log-likelihood at `theta` = (β, α)
    pub fn negative_log_likelihood(&self, theta: &[f64]) -> f64 {
        self.evaluate(theta, false).0
    }

    /// Negative log-likelihood and its gradient at `theta`
    pub fn nll_and_gradient(&self, theta: &[f64]) -> (f64, Vec<f64>) {
        self.evaluate(theta, true)
    }

    fn evaluate(&self, theta: &[f64], with_gradient: bool) -> (f64, Vec<f64>) {
        let n_occ = self.n_occ();
        let (beta, alpha) = theta.split_at(n_occ);
        let (n, j) = self.y.dim();
        let mut nll = 0.0;
        let mut grad = vec![0.0; if with_gradient { theta.len() } else { 0 }];

        for i in 0..n {
            let eta_psi = self.eta_occ(beta, i);
            let log_psi = log_logistic(eta_psi);
            let log_not_psi = log_logistic(-eta_psi);

            let mut log_a = 0.0;
            let mut detected = false;
            for v in 0..j {
                let y = self.y[(i, v)];
                if y.is_nan() {
                    continue;
                }
                let eta_p = self.eta_det(alpha, i, v);
                if y > 0.5 {
                    detected = true;
                    log_a += log_logistic(eta_p);
                } else {
                    log_a += log_logistic(-eta_p);
                }
            }

            let log_l = if detected {
                log_psi + log_a
            } else {
                log_add_exp(log_psi + log_a, log_not_psi)
            };
            nll -= log_l;

            if with_gradient {
                let psi = logistic(eta_psi);
                let r = if detected {
                    1.0
                } else {
                    (log_psi + log_a - log_l).exp()
                };
                let (g_beta, g_alpha) = grad.split_at_mut(n_occ);
                for (k, g) in g_beta.iter_mut().enumerate() {
                    *g -= (r - psi) * self.x_occ[(i, k)];
                }
                for v in 0..j {
                    let y = self.y[(i, v)];
                    if y.is_nan() {
                        continue;
                    }
                    let resid = r * (y - logistic(self.eta_det(alpha, i, v)));
                    for (k, g) in g_alpha.iter_mut().enumerate() {
                        *g -= resid * self.x_det[(i, v, k)];
                    }
                }
            }
        }
        (nll, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn design() -> OccupancyDesign {
        let y = array![[1.0, 0.0, f64::NAN], [0.0, 0.0, 0.0], [0.0, 1.0, 1.0], [0.0, f64::NAN, 0.0]];
        let x_occ = array![[1.0, -1.0], [1.0, 0.5], [1.0, 1.2], [1.0, -0.3]];
        let mut x_det = Array3::ones((4, 3, 2));
        for i in 0..4 {
            for v in 0..3 {
                x_det[(i, v, 1)] = (i as f64 - 1.5) * 0.4 + v as f64 * 0.3;
            }
        }
        OccupancyDesign { y, x_occ, x_det }
    }

    #[test]
    fn test_single_site_closed_form() {
        // one site, two visits, no detections, intercept-only
        let d = OccupancyDesign {
            y: array![[0.0, 0.0]],
            x_occ: Array2::ones((1, 1)),
            x_det: Array3::ones((1, 2, 1)),
        };
        let (psi, p) = (0.6_f64, 0.3_f64);
        let theta = [(psi / (1.0 - psi)).ln(), (p / (1.0 - p)).ln()];
        let expected = -(psi * (1.0 - p).powi(2) + 1.0 - psi).ln();
        assert_relative_eq!(d.negative_log_likelihood(&theta), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let d = design();
        let theta = [0.3, -0.4, -0.2, 0.7];
        let (_, grad) = d.nll_and_gradient(&theta);
        let h = 1e-6;
        for k in 0..theta.len() {
            let mut up = theta;
            let mut down = theta;
            up[k] += h;
            down[k] -= h;
            let numeric =
                (d.negative_log_likelihood(&up) - d.negative_log_likelihood(&down)) / (2.0 * h);
            assert_relative_eq!(grad[k], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_probabilities_mask_missing_visits() {
        let d = design();
        let (psi, p) = d.probabilities(&[0.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(psi[2], 0.5);
        assert!(p[(0, 2)].is_nan());
        assert_relative_eq!(p[(1, 1)], 0.5);
        assert_eq!(d.n_params(), 4);
    }
}
