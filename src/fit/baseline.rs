//! Background (baseline) estimation.
//!
//! A baseline is fitted to the transparent, low-energy part of the spectrum
//! and subtracted before the model fit. Which points count as "transparent"
//! depends on how much is already known about the absorption edge:
//!
//! | context     | selected points                  | fallback when < 5      |
//! |-------------|----------------------------------|------------------------|
//! | none        | lowest 30 % (clamped to 10..=50) | -                      |
//! | `Eg`        | `E < Eg`                         | lowest 20              |
//! | `Eg`, `Eb`  | `E < Eg − 1.5·Eb`                | lowest 30 % (10..=50)  |
//!
//! "Lowest" always means lowest energy, whatever the row order of the file.

use serde::{Deserialize, Serialize};

use crate::domain::{BaselineMode, Orientation};
use crate::math::fit_line;

/// Fraction of the axis used when nothing is known about the edge.
const LOW_WINDOW_FRACTION: f64 = 0.3;
const LOW_WINDOW_MIN: usize = 10;
const LOW_WINDOW_MAX: usize = 50;

/// Minimum number of selected points before falling back.
const MIN_SELECTED: usize = 5;

/// Fallback size when only `Eg` is known.
const EG_ONLY_FALLBACK: usize = 20;

/// Safety margin below the exciton peak, in units of `Eb`.
const EB_MARGIN: f64 = 1.5;

/// Rayleigh fits with `Σ E⁸` below this are skipped.
const RAYLEIGH_MIN_NORM: f64 = 1e-10;

/// What is already known about the absorption edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BaselineContext {
    pub eg: Option<f64>,
    pub eb: Option<f64>,
}

impl BaselineContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_edge(eg: f64, eb: f64) -> Self {
        Self {
            eg: Some(eg),
            eb: Some(eb),
        }
    }
}

/// Fitted background over the full axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub curve: Vec<f64>,
    /// Points the baseline was fitted on.
    pub mask: Vec<bool>,
    /// `[intercept, slope]` for linear, `[a]` for Rayleigh, empty otherwise.
    pub coefficients: Vec<f64>,
}

impl Baseline {
    fn zero(mask: Vec<bool>) -> Self {
        Self {
            curve: vec![0.0; mask.len()],
            mask,
            coefficients: Vec::new(),
        }
    }

    /// `raw − curve`.
    pub fn subtract_from(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().zip(&self.curve).map(|(y, b)| y - b).collect()
    }
}

/// Estimate the baseline of `raw` under `mode`.
pub fn estimate_baseline(
    mode: BaselineMode,
    energy: &[f64],
    raw: &[f64],
    orientation: Orientation,
    context: BaselineContext,
) -> Baseline {
    let n = energy.len();
    if mode == BaselineMode::None {
        return Baseline::zero(vec![false; n]);
    }

    let mask = select_points(energy, orientation, context);
    let (x, y): (Vec<f64>, Vec<f64>) = energy
        .iter()
        .zip(raw)
        .zip(&mask)
        .filter(|(_, selected)| **selected)
        .map(|((&e, &a), _)| (e, a))
        .unzip();

    if x.len() < 2 {
        log::debug!("baseline: only {} point(s) selected, using zero baseline", x.len());
        return Baseline::zero(mask);
    }

    match mode {
        BaselineMode::Linear => match fit_line(&x, &y) {
            Some(line) => Baseline {
                curve: energy.iter().map(|&e| line.eval(e)).collect(),
                mask,
                coefficients: vec![line.intercept, line.slope],
            },
            None => {
                log::debug!("baseline: degenerate linear fit, using zero baseline");
                Baseline::zero(mask)
            }
        },
        BaselineMode::Rayleigh => {
            let norm: f64 = x.iter().map(|e| e.powi(8)).sum();
            if norm < RAYLEIGH_MIN_NORM {
                return Baseline::zero(mask);
            }
            let a = x.iter().zip(&y).map(|(e, v)| v * e.powi(4)).sum::<f64>() / norm;
            Baseline {
                curve: energy.iter().map(|e| a * e.powi(4)).collect(),
                mask,
                coefficients: vec![a],
            }
        }
        BaselineMode::None => Baseline::zero(mask),
    }
}

/// Which points the baseline is fitted on.
pub fn select_points(energy: &[f64], orientation: Orientation, context: BaselineContext) -> Vec<bool> {
    let n = energy.len();
    match (context.eg, context.eb) {
        (Some(eg), Some(eb)) if eb > 0.0 => {
            let threshold = eg - EB_MARGIN * eb;
            let mask: Vec<bool> = energy.iter().map(|&e| e < threshold).collect();
            if count(&mask) < MIN_SELECTED {
                low_window(n, orientation)
            } else {
                mask
            }
        }
        (Some(eg), _) => {
            let mask: Vec<bool> = energy.iter().map(|&e| e < eg).collect();
            if count(&mask) < MIN_SELECTED {
                lowest(n, orientation, EG_ONLY_FALLBACK)
            } else {
                mask
            }
        }
        (None, _) => low_window(n, orientation),
    }
}

fn low_window(n: usize, orientation: Orientation) -> Vec<bool> {
    let size = ((n as f64 * LOW_WINDOW_FRACTION) as usize).clamp(LOW_WINDOW_MIN, LOW_WINDOW_MAX);
    lowest(n, orientation, size)
}

fn lowest(n: usize, orientation: Orientation, size: usize) -> Vec<bool> {
    let (start, end) = orientation.low_energy_range(n, size);
    (0..n).map(|i| i >= start && i < end).collect()
}

fn count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}
