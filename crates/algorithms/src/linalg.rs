//! Small dense solvers for normal equations and Hessians.
//!
//! Systems here have at most a few dozen unknowns (model coefficients), so
//! partial-pivot Gaussian elimination on row-major buffers is enough.

use birdocc_core::{Error, Result};
use ndarray::Array2;

const PIVOT_EPS: f64 = 1e-12;

/// Solve `mat * x = rhs` in place for an `n x n` row-major matrix.
///
/// Both buffers are overwritten. Returns `Error::Algorithm` when a pivot
/// falls below the tolerance.
pub fn solve(n: usize, mat: &mut [f64], rhs: &mut [f64]) -> Result<Vec<f64>> {
    debug_assert_eq!(mat.len(), n * n);
    debug_assert_eq!(rhs.len(), n);

    for col in 0..n {
        let (max_row, max_val) = (col..n)
            .map(|row| (row, mat[row * n + col].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if max_val < PIVOT_EPS {
            return Err(Error::Algorithm("singular system".into()));
        }

        if max_row != col {
            for j in 0..n {
                mat.swap(col * n + j, max_row * n + j);
            }
            rhs.swap(col, max_row);
        }

        let pivot = mat[col * n + col];
        for row in (col + 1)..n {
            let factor = mat[row * n + col] / pivot;
            mat[row * n + col] = 0.0;
            for j in (col + 1)..n {
                mat[row * n + j] -= factor * mat[col * n + j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0_f64; n];
    for col in (0..n).rev() {
        let tail: f64 = ((col + 1)..n).map(|j| mat[col * n + j] * x[j]).sum();
        x[col] = (rhs[col] - tail) / mat[col * n + col];
    }
    Ok(x)
}

/// Inverse of a square matrix by Gauss-Jordan elimination with partial
/// pivoting.
pub fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(Error::SizeMismatch {
            er: n,
            ec: n,
            ar: a.nrows(),
            ac: a.ncols(),
        });
    }

    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    let mut m = a.clone();
    let mut inv = Array2::<f64>::eye(n);

    for col in 0..n {
        let (max_row, max_val) = (col..n)
            .map(|row| (row, m[(row, col)].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if !(max_val > PIVOT_EPS * scale) {
            return Err(Error::Algorithm("singular matrix".into()));
        }

        if max_row != col {
            for j in 0..n {
                m.swap((col, j), (max_row, j));
                inv.swap((col, j), (max_row, j));
            }
        }

        let pivot = m[(col, col)];
        for j in 0..n {
            m[(col, j)] /= pivot;
            inv[(col, j)] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[(row, col)];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[(row, j)] -= factor * m[(col, j)];
                inv[(row, j)] -= factor * inv[(col, j)];
            }
        }
    }

    Ok(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_solve_3x3() {
        // x = 1, y = 2, z = 3
        let mut mat = [2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0];
        let mut rhs = [1.0, 1.0, 6.0];
        let x = solve(3, &mut mat, &mut rhs).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_needs_pivoting() {
        let mut mat = [0.0, 1.0, 1.0, 0.0];
        let mut rhs = [3.0, 4.0];
        let x = solve(2, &mut mat, &mut rhs).unwrap();
        assert_relative_eq!(x[0], 4.0);
        assert_relative_eq!(x[1], 3.0);
    }

    #[test]
    fn test_invert_roundtrip() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let inv = invert(&a).unwrap();
        let eye = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(eye[(i, j)], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_singular_rejected() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(invert(&a).is_err());
        let mut mat = [1.0, 2.0, 2.0, 4.0];
        let mut rhs = [1.0, 2.0];
        assert!(solve(2, &mut mat, &mut rhs).is_err());
    }
}
