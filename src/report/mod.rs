//! Reporting utilities: per-dataset diagnostics and formatted terminal output.

pub mod format;

pub use format::*;

/// Energy span `(min, max)` and point count covered by `mask`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskRange {
    pub min: f64,
    pub max: f64,
    pub points: usize,
}

/// `None` when the mask selects nothing.
pub fn mask_range(energy: &[f64], mask: &[bool]) -> Option<MaskRange> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut points = 0usize;
    for (&e, &m) in energy.iter().zip(mask) {
        if m {
            min = min.min(e);
            max = max.max(e);
            points += 1;
        }
    }
    (points > 0).then_some(MaskRange { min, max, points })
}
