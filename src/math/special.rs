//! Numerically guarded special functions and order statistics.
//!
//! Numerical notes:
//! - `sech²(x)` is evaluated as `4t / (1 + t)²` with `t = exp(−2|x|)`, which
//!   never overflows. The argument is still clamped to `[-700, 700]` so the
//!   result matches the guarded `cosh` form everywhere.
//! - Percentiles use linear interpolation between closest ranks.

/// Clamp bound for hyperbolic arguments (`cosh(710)` overflows f64).
pub const HYPERBOLIC_ARG_LIMIT: f64 = 700.0;

/// `sech²(x) = 1 / cosh²(x)`, overflow-safe.
#[inline]
pub fn sech2(x: f64) -> f64 {
    let x = x.clamp(-HYPERBOLIC_ARG_LIMIT, HYPERBOLIC_ARG_LIMIT);
    let t = (-2.0 * x.abs()).exp();
    let d = 1.0 + t;
    4.0 * t / (d * d)
}

/// `p`-th percentile (`0..=100`) with linear interpolation.
///
/// Returns `None` for empty input.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Trapezoidal-rule weights for `n` uniformly spaced nodes with spacing `h`.
pub fn fill_trapezoid_weights(n: usize, h: f64, out: &mut Vec<f64>) {
    out.clear();
    out.resize(n, h);
    if let Some(first) = out.first_mut() {
        *first = 0.5 * h;
    }
    if n > 1 {
        out[n - 1] = 0.5 * h;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sech2_matches_cosh_form() {
        for &x in &[-5.0, -1.0, -0.1, 0.0, 0.3, 2.0, 10.0] {
            let c = f64::cosh(x);
            assert!((sech2(x) - 1.0 / (c * c)).abs() < 1e-14, "x={x}");
        }
        assert_eq!(sech2(0.0), 1.0);
    }

    #[test]
    fn sech2_extreme_arguments_are_finite() {
        for &x in &[-1e6, -800.0, 700.0, 1e300, f64::MAX] {
            let v = sech2(x);
            assert!(v.is_finite() && v >= 0.0);
        }
    }

    #[test]
    fn percentile_interpolates_like_closest_ranks() {
        let v = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(5.0));
        assert_eq!(median(&v), Some(3.0));
        assert!((percentile(&v, 10.0).unwrap() - 1.4).abs() < 1e-12);
        assert_eq!(median(&[1.0, 2.0]), Some(1.5));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn trapezoid_weights_integrate_linear_exactly() {
        let n = 11;
        let h = 0.1;
        let mut w = Vec::new();
        fill_trapezoid_weights(n, h, &mut w);
        let integral: f64 = (0..n).map(|i| w[i] * (i as f64 * h)).sum();
        assert!((integral - 0.5).abs() < 1e-12);
    }
}
