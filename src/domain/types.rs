//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - rendered into terminal reports without re-running a fit

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fit::OptimizerConfig;

/// Number of model parameters `[Eg, Eb, Gamma, ucvsq, mhcnp, q]`.
pub const PARAM_COUNT: usize = 6;

/// `h·c` in eV·nm, used for wavelength ↔ photon energy conversion.
pub const HC_EV_NM: f64 = 1239.84193;

/// Convert a wavelength in nm to photon energy in eV.
pub fn wavelength_to_energy(nm: f64) -> f64 {
    HC_EV_NM / nm
}

/// Convert a photon energy in eV to wavelength in nm.
pub fn energy_to_wavelength(ev: f64) -> f64 {
    HC_EV_NM / ev
}

/// Background model subtracted before fitting.
///
/// On the command line and in configs the modes are addressed by their
/// numeric codes `0`, `1`, `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMode {
    /// Baseline is identically zero.
    None,
    /// Least-squares straight line.
    Linear,
    /// Rayleigh scattering background `a·E⁴`.
    Rayleigh,
}

impl BaselineMode {
    pub fn from_code(code: u8) -> Result<Self, AppError> {
        match code {
            0 => Ok(BaselineMode::None),
            1 => Ok(BaselineMode::Linear),
            2 => Ok(BaselineMode::Rayleigh),
            other => Err(AppError::config(format!(
                "Unsupported baseline mode {other} (expected 0=none, 1=linear, 2=rayleigh)."
            ))),
        }
    }

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            BaselineMode::None => "none",
            BaselineMode::Linear => "linear",
            BaselineMode::Rayleigh => "Rayleigh (E^4)",
        }
    }
}

/// Unit of the first input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisUnit {
    #[serde(rename = "ev")]
    ElectronVolt,
    #[serde(rename = "nm")]
    Nanometer,
}

impl AxisUnit {
    /// Mean-magnitude heuristic: photon energies are a few eV, wavelengths are
    /// hundreds of nm. A mean above 50 means nanometers.
    pub fn detect(values: &[f64]) -> Self {
        if values.is_empty() {
            return AxisUnit::ElectronVolt;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean > 50.0 {
            AxisUnit::Nanometer
        } else {
            AxisUnit::ElectronVolt
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AxisUnit::ElectronVolt => "eV",
            AxisUnit::Nanometer => "nm",
        }
    }
}

/// Sort direction of the energy axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Ascending,
    Descending,
}

impl Orientation {
    /// Ascending iff the first energy is below the last one.
    pub fn detect(energy: &[f64]) -> Self {
        match (energy.first(), energy.last()) {
            (Some(first), Some(last)) if first < last => Orientation::Ascending,
            _ => Orientation::Descending,
        }
    }

    /// Index range `[start, end)` of the `count` lowest-energy points.
    pub fn low_energy_range(self, len: usize, count: usize) -> (usize, usize) {
        let count = count.min(len);
        match self {
            Orientation::Ascending => (0, count),
            Orientation::Descending => (len - count, len),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Orientation::Ascending => "ascending",
            Orientation::Descending => "descending",
        }
    }

    /// Indices in low-to-high energy order.
    pub fn low_to_high(self, len: usize) -> Box<dyn Iterator<Item = usize>> {
        match self {
            Orientation::Ascending => Box::new(0..len),
            Orientation::Descending => Box::new((0..len).rev()),
        }
    }
}

/// Fit parameters of the exciton + continuum model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Band gap energy (eV).
    pub eg: f64,
    /// Exciton binding energy (eV).
    pub eb: f64,
    /// Line broadening (eV).
    pub gamma: f64,
    /// Transition dipole moment squared (amplitude scale).
    pub ucvsq: f64,
    /// Mass parameter shaping the continuum.
    pub mhcnp: f64,
    /// Fractional dimensionality, `Deff = 3 − 2q`.
    pub q: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            eg: 2.62,
            eb: 0.050,
            gamma: 0.043,
            ucvsq: 37.0,
            mhcnp: 0.060,
            q: 0.0,
        }
    }
}

impl ModelParameters {
    pub fn to_array(&self) -> [f64; PARAM_COUNT] {
        [self.eg, self.eb, self.gamma, self.ucvsq, self.mhcnp, self.q]
    }

    /// # Panics
    /// Panics if `values` has fewer than [`PARAM_COUNT`] entries.
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            eg: values[0],
            eb: values[1],
            gamma: values[2],
            ucvsq: values[3],
            mhcnp: values[4],
            q: values[5],
        }
    }

    /// Effective dimension.
    pub fn deff(&self) -> f64 {
        3.0 - 2.0 * self.q
    }
}

/// Box constraints for [`ModelParameters`], in array order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub lower: [f64; PARAM_COUNT],
    pub upper: [f64; PARAM_COUNT],
}

impl ParamBounds {
    /// Fixed bounds for everything but `Eg`, which gets `[eg_lo, eg_hi]`.
    pub fn with_eg(eg_lo: f64, eg_hi: f64) -> Self {
        Self {
            lower: [eg_lo, 0.01, 0.00, 0.01, 0.0, 0.0],
            upper: [eg_hi, 0.20, 0.20, 1000.0, 0.999, 1.5],
        }
    }

    /// `Eg ∈ [center − half, center + half]`, widened to `± fallback_half`
    /// when that range is degenerate.
    pub fn eg_window(center: f64, half: f64, fallback_half: f64) -> Self {
        let (lo, hi) = (center - half, center + half);
        if lo < hi {
            Self::with_eg(lo, hi)
        } else {
            Self::with_eg(center - fallback_half, center + fallback_half)
        }
    }

    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.lower.iter().copied().zip(self.upper.iter().copied()).collect()
    }
}

/// Empirically tuned pipeline constants.
///
/// Defaults reproduce the values the fitting procedure was calibrated with.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTuning {
    /// Lower energy percentile of the preliminary fit window.
    pub prelim_low_pct: f64,
    /// Upper energy percentile of the preliminary fit window.
    pub prelim_high_pct: f64,
    /// Cleaned absorption above which the bandgap scan stops.
    pub bandgap_threshold: f64,
    /// Half width of the dynamic `Eg` bound window (eV).
    pub eg_half_window: f64,
    /// Half width used when the primary window is degenerate (eV).
    pub eg_fallback_half_window: f64,
    /// Half width of the auto-range refit window around the fitted `Eg` (eV).
    pub auto_range_half_width: f64,
    /// Minimum number of points in a fit mask before falling back to the full range.
    pub min_fit_points: usize,
    /// `Eb` seed of the preliminary fit (eV).
    pub eb_seed: f64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            prelim_low_pct: 10.0,
            prelim_high_pct: 90.0,
            bandgap_threshold: 0.01,
            eg_half_window: 0.2,
            eg_fallback_half_window: 0.3,
            auto_range_half_width: 0.5,
            min_fit_points: 10,
            eb_seed: 0.050,
        }
    }
}

impl PipelineTuning {
    pub fn validate(&self) -> Result<(), AppError> {
        let pct_ok = |p: f64| p.is_finite() && (0.0..=100.0).contains(&p);
        if !(pct_ok(self.prelim_low_pct) && pct_ok(self.prelim_high_pct))
            || self.prelim_low_pct >= self.prelim_high_pct
        {
            return Err(AppError::config(format!(
                "Invalid preliminary percentile window [{}, {}] (need 0 <= low < high <= 100).",
                self.prelim_low_pct, self.prelim_high_pct
            )));
        }
        if !self.bandgap_threshold.is_finite() {
            return Err(AppError::config("Bandgap threshold must be finite."));
        }
        for (name, v) in [
            ("eg_half_window", self.eg_half_window),
            ("eg_fallback_half_window", self.eg_fallback_half_window),
            ("auto_range_half_width", self.auto_range_half_width),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::config(format!("`{name}` must be finite and > 0.")));
            }
        }
        Ok(())
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input_path: PathBuf,
    pub baseline_mode: BaselineMode,
    /// 1-based dataset (column) indices to fit; `None` fits all.
    pub datasets: Option<Vec<usize>>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    /// Refit within `Eg ± auto_range_half_width` after the final fit.
    pub auto_range: bool,
    /// Seed each dataset from the previous dataset's converged parameters.
    pub warm_start: bool,
    pub tuning: PipelineTuning,
    pub optimizer: OptimizerConfig,

    pub export_results: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
}

impl FitConfig {
    /// Defaults for everything but the input file.
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            baseline_mode: BaselineMode::Rayleigh,
            datasets: None,
            min_energy: None,
            max_energy: None,
            auto_range: true,
            warm_start: true,
            tuning: PipelineTuning::default(),
            optimizer: OptimizerConfig::default(),
            export_results: None,
            export_json: None,
        }
    }
}

/// A loaded absorption table.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Display name (file stem).
    pub name: String,
    /// First column as read (nm or eV).
    pub axis_raw: Vec<f64>,
    /// Photon energy axis (eV), same order as the file.
    pub energy: Vec<f64>,
    pub unit: AxisUnit,
    pub orientation: Orientation,
    /// One absorption column per dataset.
    pub columns: Vec<Vec<f64>>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn dataset_count(&self) -> usize {
        self.columns.len()
    }

    /// Absorption column for a 1-based dataset index.
    pub fn dataset(&self, index: usize) -> Option<&[f64]> {
        index.checked_sub(1).and_then(|i| self.columns.get(i)).map(Vec::as_slice)
    }
}

/// States of the per-dataset refinement sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    InitialBaseline,
    BandgapDetect,
    PrelimFit,
    BaselineRefine,
    FinalFit,
    AutoRefine,
    Done,
}

/// Exponential sub-gap tail `ln α = slope·E + intercept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrbachTail {
    pub slope: f64,
    pub intercept: f64,
    /// `intercept + slope·E` over the full energy axis.
    pub curve: Vec<f64>,
}

impl UrbachTail {
    /// The defined "no tail found" result.
    pub fn zero(len: usize) -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            curve: vec![0.0; len],
        }
    }
}

/// Complete, immutable fit result for one dataset.
#[derive(Debug, Clone)]
pub struct DatasetFit {
    /// 1-based column index.
    pub dataset: usize,
    pub params: ModelParameters,
    /// SSE of the authoritative fit over its own mask.
    pub sse: f64,
    pub r_squared: f64,
    /// Bandgap estimate from the threshold scan.
    pub initial_eg: f64,
    /// Whether the auto-range refit became authoritative.
    pub auto_range_applied: bool,

    pub raw: Vec<f64>,
    pub baseline: Vec<f64>,
    pub cleaned: Vec<f64>,
    pub fitted: Vec<f64>,
    pub exciton: Vec<f64>,
    pub band: Vec<f64>,
    pub urbach: UrbachTail,

    pub fit_mask: Vec<bool>,
    pub baseline_mask: Vec<bool>,
    /// Stages visited, in order.
    pub stages: Vec<PipelineStage>,
}

/// A spectrum together with every dataset fitted from it.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub spectrum: Spectrum,
    /// In dataset order.
    pub fits: Vec<DatasetFit>,
}
