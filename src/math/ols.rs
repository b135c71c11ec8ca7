//! Ordinary least squares.
//!
//! Two small regressions show up in the pipeline:
//!
//! ```text
//! baseline (linear mode):  y = a + b·E
//! Urbach tail:         ln α = intercept + slope·E
//! ```
//!
//! Both are solved through the same SVD-based solver. The design matrices are
//! tall (many rows, two columns), so we use SVD rather than `QR::solve`, which
//! is intended for square systems.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Straight line `y = intercept + slope·x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    pub fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Least-squares line through `(x_i, y_i)`.
///
/// Returns `None` for fewer than two points or when all `x` coincide (the
/// slope is then undetermined).
pub fn fit_line(x: &[f64], y: &[f64]) -> Option<Line> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let x0 = x[0];
    if x[..n].iter().all(|&xi| (xi - x0).abs() <= 1e-15 * x0.abs().max(1.0)) {
        return None;
    }

    // Center x so the columns stay well conditioned for energies around a few eV.
    let x_mean = x[..n].iter().sum::<f64>() / n as f64;
    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] - x_mean });
    let rhs = DVector::from_row_slice(&y[..n]);

    let beta = solve_least_squares(&design, &rhs)?;
    let slope = beta[1];
    Some(Line {
        slope,
        intercept: beta[0] - slope * x_mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn fit_line_recovers_exact_line() {
        let x: Vec<f64> = (0..20).map(|i| 2.3 + 0.01 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&e| -1.5 + 0.8 * e).collect();
        let line = fit_line(&x, &y).unwrap();
        assert!((line.slope - 0.8).abs() < 1e-9);
        assert!((line.intercept + 1.5).abs() < 1e-9);
        assert!((line.eval(3.0) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn fit_line_rejects_degenerate_input() {
        assert!(fit_line(&[1.0], &[2.0]).is_none());
        assert!(fit_line(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }
}
