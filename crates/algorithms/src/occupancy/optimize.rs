//! Quasi-Newton minimization and numeric Hessians

use birdocc_core::{Error, Result};
use ndarray::Array2;

/// Sufficient-decrease constant of the Armijo condition
const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;
const MAX_BACKTRACKS: usize = 60;
/// Longest step (Euclidean) tried in one iteration, on the logit scale
const MAX_STEP: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct BfgsOptions {
    pub max_iterations: usize,
    /// Converged when max |gradient| falls below this
    pub gradient_tolerance: f64,
}

impl Default for BfgsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            gradient_tolerance: 1e-5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BfgsResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub gradient_norm: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// Minimize `f` from `x0` with BFGS and Armijo backtracking.
///
/// `f` returns the objective and its gradient. The inverse-Hessian
/// approximation is reset to the identity whenever it stops producing a
/// descent direction.
pub fn bfgs<F>(f: F, x0: Vec<f64>, options: &BfgsOptions) -> Result<BfgsResult>
where
    F: Fn(&[f64]) -> (f64, Vec<f64>),
{
    let n = x0.len();
    let mut x = x0;
    let (mut fx, mut g) = f(&x);
    if !fx.is_finite() {
        return Err(Error::Algorithm(format!(
            "objective is not finite at the starting point ({})",
            fx
        )));
    }

    let identity = || Array2::<f64>::eye(n);
    let mut h = identity();
    let mut fresh = true;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        if max_abs(&g) <= options.gradient_tolerance {
            break;
        }
        iterations += 1;

        let mut d: Vec<f64> = (0..n)
            .map(|i| -(0..n).map(|j| h[(i, j)] * g[j]).sum::<f64>())
            .collect();
        let mut slope = dot(&g, &d);
        if !(slope < 0.0) {
            h = identity();
            fresh = true;
            d = g.iter().map(|v| -v).collect();
            slope = dot(&g, &d);
        }
        let norm = dot(&d, &d).sqrt();
        if norm > MAX_STEP {
            let scale = MAX_STEP / norm;
            d.iter_mut().for_each(|v| *v *= scale);
            slope *= scale;
        }

        let mut t = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = x.iter().zip(&d).map(|(xi, di)| xi + t * di).collect();
            let (ft, gt) = f(&trial);
            if ft.is_finite() && ft <= fx + ARMIJO_C1 * t * slope {
                accepted = Some((trial, ft, gt));
                break;
            }
            t *= BACKTRACK;
        }

        let Some((x_new, f_new, g_new)) = accepted else {
            if fresh {
                // no progress along steepest descent either
                break;
            }
            h = identity();
            fresh = true;
            continue;
        };

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let yv: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &yv);
        if sy > 1e-12 {
            // H ← (I - ρ s yᵀ) H (I - ρ y sᵀ) + ρ s sᵀ
            let rho = 1.0 / sy;
            let hy: Vec<f64> = (0..n).map(|i| (0..n).map(|j| h[(i, j)] * yv[j]).sum()).collect();
            let yhy = dot(&yv, &hy);
            for i in 0..n {
                for j in 0..n {
                    h[(i, j)] += -rho * (hy[i] * s[j] + s[i] * hy[j])
                        + (rho * rho * yhy + rho) * s[i] * s[j];
                }
            }
            fresh = false;
        }

        x = x_new;
        fx = f_new;
        g = g_new;
    }

    let gradient_norm = max_abs(&g);
    Ok(BfgsResult {
        x,
        value: fx,
        gradient_norm,
        iterations,
        converged: gradient_norm <= options.gradient_tolerance,
    })
}

/// Hessian by central differences of an analytic gradient, symmetrized
pub fn numeric_hessian<G>(gradient: G, x: &[f64]) -> Array2<f64>
where
    G: Fn(&[f64]) -> Vec<f64>,
{
    let n = x.len();
    let mut hess = Array2::zeros((n, n));
    let mut probe = x.to_vec();
    for j in 0..n {
        let h = 1e-5 * x[j].abs().max(1.0);
        probe[j] = x[j] + h;
        let up = gradient(&probe);
        probe[j] = x[j] - h;
        let down = gradient(&probe);
        probe[j] = x[j];
        for i in 0..n {
            hess[(i, j)] = (up[i] - down[i]) / (2.0 * h);
        }
    }
    let transpose = hess.t().to_owned();
    (hess + transpose) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rosenbrock(x: &[f64]) -> (f64, Vec<f64>) {
        let (a, b) = (x[0], x[1]);
        let f = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
        let g = vec![
            -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
            200.0 * (b - a * a),
        ];
        (f, g)
    }

    #[test]
    fn test_bfgs_rosenbrock() {
        let options = BfgsOptions {
            max_iterations: 1000,
            gradient_tolerance: 1e-8,
        };
        let res = bfgs(rosenbrock, vec![-1.2, 1.0], &options).unwrap();
        assert!(res.converged);
        assert_relative_eq!(res.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(res.x[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bfgs_reports_non_convergence() {
        let options = BfgsOptions {
            max_iterations: 2,
            gradient_tolerance: 1e-12,
        };
        let res = bfgs(rosenbrock, vec![-1.2, 1.0], &options).unwrap();
        assert!(!res.converged);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn test_numeric_hessian_of_quadratic() {
        // f = x² + 3xy + 5y²
        let grad = |x: &[f64]| vec![2.0 * x[0] + 3.0 * x[1], 3.0 * x[0] + 10.0 * x[1]];
        let h = numeric_hessian(grad, &[0.7, -1.3]);
        assert_relative_eq!(h[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(h[(0, 1)], 3.0, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 0)], 3.0, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 1)], 10.0, epsilon = 1e-6);
    }
}
