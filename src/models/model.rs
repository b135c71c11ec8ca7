//! Exciton + continuum absorption model.
//!
//! ```text
//! α(E) = ucvsq·√Eb · [ Σ_{n=1..50} 2Eb/(n−q)³ · sech²((E − Eₙ)/Γ)          (exciton)
//!                    + ∫_{Eg}^{2Eg} sech²((E − E')/Γ) · (1 + 10mΔ + 126m²Δ²)
//!                                   / (1 − exp(−2π√(Eb/Δ))) dE' ]           (band)
//! Eₙ = Eg − Eb/(n−q)²,   Δ = E' − Eg,   m = mhcnp
//! ```
//!
//! The optimizer evaluates this thousands of times per dataset, so the hot path
//! lives on [`ModelWorkspace`], which keeps its buffers between calls:
//!
//! - the per-grid-point continuum factor (trapezoid weight × Sommerfeld term)
//!   depends only on the parameters, so it is computed once per call instead
//!   of once per `(axis, grid)` pair
//! - each axis point only visits grid points within `SECH2_SUPPORT·Γ`; beyond
//!   that sech² is below 1e-25 and the skipped tail is invisible in f64

use serde::{Deserialize, Serialize};

use crate::domain::ModelParameters;
use crate::math::{fill_trapezoid_weights, sech2};

/// Principal quantum numbers summed in the exciton series.
pub const EXCITON_SERIES_TERMS: usize = 50;

/// Continuum grid points per energy-axis point.
pub const BAND_GRID_FACTOR: usize = 10;

/// Floor for `|Γ|`.
pub const GAMMA_FLOOR: f64 = 1e-10;

/// Multiplier applied to the SSE when `mhcnp ≤ 0`.
pub const MASS_PENALTY: f64 = 10.0;

/// Terms with `|n − q|` below this are skipped.
const SINGULAR_TERM_EPS: f64 = 1e-10;

/// Floor for the Sommerfeld denominator magnitude.
const SOMMERFELD_FLOOR: f64 = 1e-10;

/// `|x|` beyond which `sech²(x)` contributes nothing representable.
const SECH2_SUPPORT: f64 = 30.0;

/// Full model output over an energy axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub sse: f64,
    pub fitted: Vec<f64>,
    pub exciton: Vec<f64>,
    pub band: Vec<f64>,
}

/// Reusable buffers for repeated model evaluation.
#[derive(Debug, Default, Clone)]
pub struct ModelWorkspace {
    exciton: Vec<f64>,
    band: Vec<f64>,
    trapz: Vec<f64>,
    grid_weight: Vec<f64>,
}

impl ModelWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// SSE against `observed` without materializing the fitted curve.
    pub fn sse(&mut self, params: &ModelParameters, energy: &[f64], observed: &[f64]) -> f64 {
        let scale = self.fill_components(params, energy);
        let mut sse = 0.0;
        for ((&a1, &a2), &y) in self.exciton.iter().zip(&self.band).zip(observed) {
            let r = scale * (a2 + a1) - y;
            sse += r * r;
        }
        apply_mass_penalty(sse, params.mhcnp)
    }

    /// SSE plus the fitted, exciton and band curves.
    pub fn evaluate(
        &mut self,
        params: &ModelParameters,
        energy: &[f64],
        observed: &[f64],
    ) -> ModelEvaluation {
        let scale = self.fill_components(params, energy);

        let exciton: Vec<f64> = self.exciton.iter().map(|&a| scale * a).collect();
        let band: Vec<f64> = self.band.iter().map(|&a| scale * a).collect();
        let fitted: Vec<f64> = self
            .exciton
            .iter()
            .zip(&self.band)
            .map(|(&a1, &a2)| scale * (a2 + a1))
            .collect();

        let sse = fitted
            .iter()
            .zip(observed)
            .map(|(&f, &y)| (f - y) * (f - y))
            .sum::<f64>();

        ModelEvaluation {
            sse: apply_mass_penalty(sse, params.mhcnp),
            fitted,
            exciton,
            band,
        }
    }

    /// Fill the unscaled exciton and band buffers; returns `ucvsq·√Eb`.
    fn fill_components(&mut self, p: &ModelParameters, energy: &[f64]) -> f64 {
        let n = energy.len();
        self.exciton.clear();
        self.exciton.resize(n, 0.0);
        self.band.clear();
        self.band.resize(n, 0.0);

        let gamma = p.gamma.abs().max(GAMMA_FLOOR);
        let inv_gamma = 1.0 / gamma;

        for k in 1..=EXCITON_SERIES_TERMS {
            let d = k as f64 - p.q;
            if d.abs() < SINGULAR_TERM_EPS {
                continue;
            }
            let center = p.eg - p.eb / (d * d);
            let amplitude = 2.0 * p.eb / (d * d * d);
            for (a, &e) in self.exciton.iter_mut().zip(energy) {
                *a += amplitude * sech2((e - center) * inv_gamma);
            }
        }

        self.fill_band(p, energy, gamma);

        p.ucvsq * p.eb.max(0.0).sqrt()
    }

    fn fill_band(&mut self, p: &ModelParameters, energy: &[f64], gamma: f64) {
        let m = BAND_GRID_FACTOR * energy.len();
        if m < 2 || !(p.eg.is_finite() && p.eg > 0.0) {
            return;
        }

        // Grid E_j = Eg + j·h spans [Eg, 2Eg].
        let h = p.eg / (m - 1) as f64;
        fill_trapezoid_weights(m, h, &mut self.trapz);

        self.grid_weight.clear();
        self.grid_weight.extend(self.trapz.iter().enumerate().map(|(j, &w)| {
            let de = j as f64 * h;
            if de <= 0.0 {
                return 0.0;
            }
            let b = 10.0 * p.mhcnp * de + 126.0 * p.mhcnp * p.mhcnp * de * de;
            let ratio = p.eb / de;
            let mut denom = if ratio <= 0.0 {
                1.0
            } else {
                1.0 - (-2.0 * std::f64::consts::PI * ratio.sqrt()).exp()
            };
            if denom.abs() < SOMMERFELD_FLOOR {
                denom = SOMMERFELD_FLOOR;
            }
            w * (1.0 + b) / denom
        }));

        let inv_gamma = 1.0 / gamma;
        let reach = SECH2_SUPPORT * gamma;
        let last = (m - 1) as f64;

        for (out, &e) in self.band.iter_mut().zip(energy) {
            let offset = e - p.eg;
            let lo = ((offset - reach) / h).ceil();
            let hi = ((offset + reach) / h).floor();
            if hi < 0.0 || lo > last {
                continue;
            }
            let lo = lo.max(0.0) as usize;
            let hi = hi.min(last) as usize;

            let mut acc = 0.0;
            for j in lo..=hi {
                let grid_e = p.eg + j as f64 * h;
                acc += self.grid_weight[j] * sech2((e - grid_e) * inv_gamma);
            }
            *out = acc;
        }
    }
}

fn apply_mass_penalty(sse: f64, mhcnp: f64) -> f64 {
    if mhcnp <= 0.0 { MASS_PENALTY * sse } else { sse }
}

/// Evaluate the model once with a throwaway workspace.
pub fn evaluate(params: &ModelParameters, energy: &[f64], observed: &[f64]) -> ModelEvaluation {
    ModelWorkspace::new().evaluate(params, energy, observed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, lo: f64, hi: f64) -> Vec<f64> {
        (0..n).map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64).collect()
    }

    fn params() -> ModelParameters {
        ModelParameters {
            eg: 2.62,
            eb: 0.05,
            gamma: 0.03,
            ucvsq: 37.0,
            mhcnp: 0.06,
            q: 0.0,
        }
    }

    /// Unwindowed reference for the band integral.
    fn band_reference(p: &ModelParameters, energy: &[f64]) -> Vec<f64> {
        let m = BAND_GRID_FACTOR * energy.len();
        let h = p.eg / (m - 1) as f64;
        let gamma = p.gamma.abs().max(GAMMA_FLOOR);
        energy
            .iter()
            .map(|&e| {
                let mut acc = 0.0;
                for j in 0..m {
                    let de = j as f64 * h;
                    if de <= 0.0 {
                        continue;
                    }
                    let w = if j == m - 1 { 0.5 * h } else { h };
                    let b = 10.0 * p.mhcnp * de + 126.0 * p.mhcnp.powi(2) * de * de;
                    let denom = 1.0 - (-2.0 * std::f64::consts::PI * (p.eb / de).sqrt()).exp();
                    let c = ((e - (p.eg + de)) / gamma).clamp(-700.0, 700.0).cosh();
                    acc += w * (1.0 + b) / denom / (c * c);
                }
                acc * p.ucvsq * p.eb.sqrt()
            })
            .collect()
    }

    #[test]
    fn windowed_band_matches_full_integral() {
        let p = params();
        let e = axis(60, 2.3, 2.9);
        let eval = evaluate(&p, &e, &vec![0.0; e.len()]);
        let reference = band_reference(&p, &e);
        for (a, b) in eval.band.iter().zip(&reference) {
            assert!((a - b).abs() <= 1e-12 * b.abs().max(1e-3), "{a} vs {b}");
        }
    }

    #[test]
    fn fitted_is_scaled_sum_of_components() {
        let p = params();
        let e = axis(50, 2.3, 2.9);
        let eval = evaluate(&p, &e, &vec![0.0; e.len()]);
        for i in 0..e.len() {
            assert!((eval.fitted[i] - (eval.exciton[i] + eval.band[i])).abs() < 1e-12);
        }
        let sse: f64 = eval.fitted.iter().map(|f| f * f).sum();
        assert!((eval.sse - sse).abs() < 1e-12 * sse.max(1.0));
    }

    #[test]
    fn exciton_peaks_at_first_line() {
        let p = params();
        let e = axis(601, 2.3, 2.9);
        let eval = evaluate(&p, &e, &vec![0.0; e.len()]);
        let (imax, _) = eval
            .exciton
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert!((e[imax] - (p.eg - p.eb)).abs() < 0.005, "peak at {}", e[imax]);
    }

    #[test]
    fn non_positive_mass_is_penalized_tenfold() {
        let e = axis(40, 2.3, 2.9);
        let observed: Vec<f64> = e.iter().map(|&x| 0.1 * (x - 2.3)).collect();
        for &m in &[-0.06, 0.0] {
            let p = ModelParameters { mhcnp: m, ..params() };
            let eval = evaluate(&p, &e, &observed);
            let residual: f64 = eval
                .fitted
                .iter()
                .zip(&observed)
                .map(|(f, y)| (f - y) * (f - y))
                .sum();
            assert!((eval.sse - 10.0 * residual).abs() < 1e-10 * residual.max(1.0), "m={m}");
        }

        let p = params();
        let eval = evaluate(&p, &e, &observed);
        let residual: f64 = eval.fitted.iter().zip(&observed).map(|(f, y)| (f - y) * (f - y)).sum();
        assert!((eval.sse - residual).abs() < 1e-10 * residual.max(1.0));
    }

    #[test]
    fn integer_q_skips_singular_term() {
        let e = axis(30, 2.3, 2.9);
        for n in [1usize, 2, 7, 50] {
            let p = ModelParameters { q: n as f64, ..params() };
            let eval = evaluate(&p, &e, &vec![0.0; e.len()]);
            assert!(eval.sse.is_finite());
            assert!(eval.exciton.iter().all(|v| v.is_finite()));

            // Manual series without the n-th term.
            let scale = p.ucvsq * p.eb.sqrt();
            for (i, &x) in e.iter().enumerate() {
                let mut acc = 0.0;
                for k in 1..=EXCITON_SERIES_TERMS {
                    if k == n {
                        continue;
                    }
                    let d = k as f64 - p.q;
                    acc += 2.0 * p.eb / d.powi(3) * sech2((x - (p.eg - p.eb / (d * d))) / p.gamma);
                }
                assert!((eval.exciton[i] - scale * acc).abs() < 1e-9 * (scale * acc).abs().max(1.0));
            }
        }
    }

    #[test]
    fn zero_gamma_is_floored_and_finite() {
        let e = axis(30, 2.3, 2.9);
        let p = ModelParameters { gamma: 0.0, ..params() };
        let eval = evaluate(&p, &e, &vec![0.1; e.len()]);
        assert!(eval.sse.is_finite());
        assert!(eval.fitted.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn workspace_sse_matches_full_evaluation_across_calls() {
        let e = axis(80, 2.3, 2.9);
        let observed: Vec<f64> = e.iter().map(|&x| (x - 2.4).max(0.0)).collect();
        let mut ws = ModelWorkspace::new();
        for gamma in [0.01, 0.05, 0.2] {
            let p = ModelParameters { gamma, ..params() };
            let full = evaluate(&p, &e, &observed);
            let fast = ws.sse(&p, &e, &observed);
            assert!((full.sse - fast).abs() < 1e-12 * full.sse.max(1.0));
        }
        // Shorter axis after a longer one reuses the buffers.
        let short = &e[..20];
        let p = params();
        assert!((ws.sse(&p, short, &observed[..20]) - evaluate(&p, short, &observed[..20]).sse).abs() < 1e-12);
    }

    #[test]
    fn band_vanishes_far_below_gap() {
        let p = ModelParameters { gamma: 0.01, ..params() };
        let e = axis(20, 1.0, 1.5);
        let eval = evaluate(&p, &e, &vec![0.0; e.len()]);
        assert!(eval.band.iter().all(|&v| v.abs() < 1e-30));
    }
}
