//! Urbach (exponential sub-gap) tail estimate.
//!
//! The tail is taken just past the first point, in row order, whose energy
//! drops below `|Eb − Eg|`: points `i+2 .. i+10`. `ln α` is fitted with a
//! straight line there.

use crate::domain::UrbachTail;
use crate::math::fit_line;

const WINDOW_OFFSET: usize = 2;
const WINDOW_END: usize = 10;

/// Estimate the Urbach tail of `absorption` given the fitted `Eg` and `Eb`.
///
/// Points with non-positive or non-finite absorption inside the window are
/// skipped; if fewer than two usable points remain the zero tail is returned.
pub fn estimate_urbach(energy: &[f64], absorption: &[f64], eg: f64, eb: f64) -> UrbachTail {
    let n = energy.len().min(absorption.len());
    let threshold = (eb - eg).abs();

    let Some(index) = energy[..n].iter().position(|&e| e < threshold) else {
        log::debug!("urbach: no point below {threshold:.4} eV");
        return UrbachTail::zero(energy.len());
    };

    let start = (index + WINDOW_OFFSET).min(n.saturating_sub(1));
    let end = (index + WINDOW_END).min(n);
    if end <= start {
        return UrbachTail::zero(energy.len());
    }

    let (x, ln_y): (Vec<f64>, Vec<f64>) = (start..end)
        .filter(|&i| absorption[i] > 0.0 && absorption[i].is_finite())
        .map(|i| (energy[i], absorption[i].ln()))
        .unzip();

    match fit_line(&x, &ln_y) {
        Some(line) => UrbachTail {
            slope: line.slope,
            intercept: line.intercept,
            curve: energy.iter().map(|&e| line.eval(e)).collect(),
        },
        None => {
            log::debug!("urbach: {} usable point(s) in window, no tail fitted", x.len());
            UrbachTail::zero(energy.len())
        }
    }
}
