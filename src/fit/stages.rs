//! Per-dataset refinement sequence.
//!
//! ```text
//! InitialBaseline → BandgapDetect → PrelimFit → BaselineRefine → FinalFit → AutoRefine → Done
//! ```
//!
//! Each state owns exactly the data produced so far, so a transition can only
//! run once its inputs exist. Every transition is a plain function that can be
//! exercised on its own; [`fit_dataset`] just walks the machine to `Done`.
//! `AutoRefine` is skipped when auto-range is disabled.

use std::cell::RefCell;

use crate::domain::{
    BaselineMode, DatasetFit, FitConfig, ModelParameters, Orientation, ParamBounds, PipelineStage,
    PipelineTuning,
};
use crate::error::AppError;
use crate::fit::baseline::{Baseline, BaselineContext, estimate_baseline};
use crate::fit::optimizer::{LbfgsbOptimizer, ObjectiveFunction};
use crate::fit::urbach::estimate_urbach;
use crate::math::{median, percentile};
use crate::models::{ModelWorkspace, evaluate};

/// Everything a dataset fit reads but never changes.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// 1-based column index.
    pub dataset: usize,
    pub energy: &'a [f64],
    pub raw: &'a [f64],
    pub orientation: Orientation,
    pub mode: BaselineMode,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    pub auto_range: bool,
    pub tuning: &'a PipelineTuning,
    pub optimizer: &'a LbfgsbOptimizer,
}

impl<'a> StageContext<'a> {
    pub fn from_config(
        config: &'a FitConfig,
        optimizer: &'a LbfgsbOptimizer,
        dataset: usize,
        energy: &'a [f64],
        raw: &'a [f64],
        orientation: Orientation,
    ) -> Self {
        Self {
            dataset,
            energy,
            raw,
            orientation,
            mode: config.baseline_mode,
            min_energy: config.min_energy,
            max_energy: config.max_energy,
            auto_range: config.auto_range,
            tuning: &config.tuning,
            optimizer,
        }
    }
}

/// Result of one optimizer pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFit {
    pub params: ModelParameters,
    /// SSE over `mask`.
    pub sse: f64,
    /// Points the pass was fitted on.
    pub mask: Vec<bool>,
}

/// Machine state, carrying the data each later stage needs.
#[derive(Debug, Clone)]
pub enum FitState {
    InitialBaseline,
    BandgapDetect {
        initial: Baseline,
    },
    PrelimFit {
        initial: Baseline,
        initial_eg: f64,
        bounds: ParamBounds,
    },
    BaselineRefine {
        initial_eg: f64,
        bounds: ParamBounds,
        prelim: StageFit,
    },
    FinalFit {
        initial_eg: f64,
        bounds: ParamBounds,
        prelim: StageFit,
        baseline: Baseline,
        cleaned: Vec<f64>,
    },
    AutoRefine {
        initial_eg: f64,
        bounds: ParamBounds,
        baseline: Baseline,
        cleaned: Vec<f64>,
        fit: StageFit,
    },
    Done {
        initial_eg: f64,
        baseline: Baseline,
        cleaned: Vec<f64>,
        fit: StageFit,
        auto_range_applied: bool,
    },
}

impl FitState {
    pub fn stage(&self) -> PipelineStage {
        match self {
            FitState::InitialBaseline => PipelineStage::InitialBaseline,
            FitState::BandgapDetect { .. } => PipelineStage::BandgapDetect,
            FitState::PrelimFit { .. } => PipelineStage::PrelimFit,
            FitState::BaselineRefine { .. } => PipelineStage::BaselineRefine,
            FitState::FinalFit { .. } => PipelineStage::FinalFit,
            FitState::AutoRefine { .. } => PipelineStage::AutoRefine,
            FitState::Done { .. } => PipelineStage::Done,
        }
    }

    /// Run the current stage and move to the next one.
    pub fn advance(self, ctx: &StageContext<'_>, warm_seed: &ModelParameters) -> Result<FitState, AppError> {
        let next = match self {
            FitState::InitialBaseline => FitState::BandgapDetect {
                initial: initial_baseline(ctx),
            },
            FitState::BandgapDetect { initial } => {
                let signal = initial.subtract_from(ctx.raw);
                let initial_eg = detect_bandgap(ctx.energy, &signal, ctx.orientation, ctx.tuning.bandgap_threshold);
                let bounds = ParamBounds::eg_window(
                    initial_eg,
                    ctx.tuning.eg_half_window,
                    ctx.tuning.eg_fallback_half_window,
                );
                log::debug!(
                    "dataset {}: initial Eg {:.4} eV, Eg bounds [{:.4}, {:.4}]",
                    ctx.dataset,
                    initial_eg,
                    bounds.lower[0],
                    bounds.upper[0]
                );
                FitState::PrelimFit {
                    initial,
                    initial_eg,
                    bounds,
                }
            }
            FitState::PrelimFit {
                initial,
                initial_eg,
                bounds,
            } => {
                let seed = prelim_seed(initial_eg, warm_seed, ctx.tuning);
                let prelim = prelim_fit(ctx, &initial, &bounds, &seed)?;
                log::debug!(
                    "dataset {}: preliminary Eg {:.4} eV, Eb {:.1} meV",
                    ctx.dataset,
                    prelim.params.eg,
                    prelim.params.eb * 1000.0
                );
                FitState::BaselineRefine {
                    initial_eg,
                    bounds,
                    prelim,
                }
            }
            FitState::BaselineRefine {
                initial_eg,
                bounds,
                prelim,
            } => {
                let baseline = refine_baseline(ctx, &prelim.params);
                let cleaned = baseline.subtract_from(ctx.raw);
                FitState::FinalFit {
                    initial_eg,
                    bounds,
                    prelim,
                    baseline,
                    cleaned,
                }
            }
            FitState::FinalFit {
                initial_eg,
                bounds,
                prelim,
                baseline,
                cleaned,
            } => {
                let mask = user_mask(ctx.energy, ctx.min_energy, ctx.max_energy, ctx.tuning.min_fit_points);
                let fit = fit_masked(ctx, &cleaned, mask, &prelim.params, &bounds)?;
                if ctx.auto_range {
                    FitState::AutoRefine {
                        initial_eg,
                        bounds,
                        baseline,
                        cleaned,
                        fit,
                    }
                } else {
                    FitState::Done {
                        initial_eg,
                        baseline,
                        cleaned,
                        fit,
                        auto_range_applied: false,
                    }
                }
            }
            FitState::AutoRefine {
                initial_eg,
                bounds,
                baseline,
                cleaned,
                fit,
            } => {
                let (fit, auto_range_applied) = match auto_refine(ctx, &cleaned, &fit, &bounds)? {
                    Some(refit) => (refit, true),
                    None => (fit, false),
                };
                FitState::Done {
                    initial_eg,
                    baseline,
                    cleaned,
                    fit,
                    auto_range_applied,
                }
            }
            done @ FitState::Done { .. } => done,
        };
        Ok(next)
    }
}

/// Walk the machine from `InitialBaseline` to `Done` and assemble the result.
pub fn fit_dataset(ctx: &StageContext<'_>, warm_seed: &ModelParameters) -> Result<DatasetFit, AppError> {
    let mut state = FitState::InitialBaseline;
    let mut trace = Vec::new();

    loop {
        trace.push(state.stage());
        state = match state {
            FitState::Done {
                initial_eg,
                baseline,
                cleaned,
                fit,
                auto_range_applied,
            } => return Ok(finish(ctx, initial_eg, baseline, cleaned, fit, auto_range_applied, trace)),
            other => other.advance(ctx, warm_seed)?,
        };
    }
}

/// Baseline from the transparent region, before anything is known about the edge.
pub fn initial_baseline(ctx: &StageContext<'_>) -> Baseline {
    estimate_baseline(ctx.mode, ctx.energy, ctx.raw, ctx.orientation, BaselineContext::none())
}

/// Energy of the first point, from the low-energy end, where `signal` exceeds
/// `threshold`. Falls back to the median energy.
pub fn detect_bandgap(energy: &[f64], signal: &[f64], orientation: Orientation, threshold: f64) -> f64 {
    let n = energy.len().min(signal.len());
    match orientation.low_to_high(n).find(|&i| signal[i] > threshold) {
        Some(i) => energy[i],
        None => {
            log::debug!("no point above {threshold}, using median energy as initial Eg");
            median(energy).unwrap_or_default()
        }
    }
}

/// Start point for the preliminary fit.
pub fn prelim_seed(initial_eg: f64, warm_seed: &ModelParameters, tuning: &PipelineTuning) -> ModelParameters {
    ModelParameters {
        eg: initial_eg,
        eb: tuning.eb_seed,
        q: 0.0,
        ..*warm_seed
    }
}

/// Energies between the configured percentiles, or everything if that leaves
/// too few points.
pub fn prelim_mask(energy: &[f64], tuning: &PipelineTuning) -> Vec<bool> {
    let (Some(lo), Some(hi)) = (
        percentile(energy, tuning.prelim_low_pct),
        percentile(energy, tuning.prelim_high_pct),
    ) else {
        return Vec::new();
    };
    let mask: Vec<bool> = energy.iter().map(|&e| e >= lo && e <= hi).collect();
    if count(&mask) < tuning.min_fit_points {
        log::debug!("preliminary window has {} points, using full range", count(&mask));
        return vec![true; energy.len()];
    }
    mask
}

pub fn prelim_fit(
    ctx: &StageContext<'_>,
    initial: &Baseline,
    bounds: &ParamBounds,
    seed: &ModelParameters,
) -> Result<StageFit, AppError> {
    let signal = initial.subtract_from(ctx.raw);
    let mask = prelim_mask(ctx.energy, ctx.tuning);
    fit_masked(ctx, &signal, mask, seed, bounds)
}

/// Baseline from the region below the preliminary exciton line.
pub fn refine_baseline(ctx: &StageContext<'_>, prelim: &ModelParameters) -> Baseline {
    let baseline = estimate_baseline(
        ctx.mode,
        ctx.energy,
        ctx.raw,
        ctx.orientation,
        BaselineContext::from_edge(prelim.eg, prelim.eb),
    );
    log::debug!(
        "dataset {}: {} baseline from {} points below {:.4} eV",
        ctx.dataset,
        ctx.mode.display_name(),
        count(&baseline.mask),
        prelim.eg - 1.5 * prelim.eb
    );
    baseline
}

/// `[min_energy, max_energy]`, open where unset. Falls back to the full range
/// when fewer than `min_points` remain.
pub fn user_mask(energy: &[f64], min_energy: Option<f64>, max_energy: Option<f64>, min_points: usize) -> Vec<bool> {
    let mask = range_mask(energy, min_energy, max_energy);
    if count(&mask) < min_points {
        log::warn!(
            "fitting range contains too few points ({}), using full range",
            count(&mask)
        );
        return vec![true; energy.len()];
    }
    mask
}

/// `[Eg − half, Eg + half]` intersected with the user range.
pub fn auto_range_mask(
    energy: &[f64],
    eg: f64,
    half_width: f64,
    min_energy: Option<f64>,
    max_energy: Option<f64>,
) -> Vec<bool> {
    let around = range_mask(energy, Some(eg - half_width), Some(eg + half_width));
    let user = range_mask(energy, min_energy, max_energy);
    around.iter().zip(&user).map(|(&a, &u)| a && u).collect()
}

/// Refit on the auto-range window. `None` when the window is too small.
pub fn auto_refine(
    ctx: &StageContext<'_>,
    cleaned: &[f64],
    fit: &StageFit,
    bounds: &ParamBounds,
) -> Result<Option<StageFit>, AppError> {
    let mask = auto_range_mask(
        ctx.energy,
        fit.params.eg,
        ctx.tuning.auto_range_half_width,
        ctx.min_energy,
        ctx.max_energy,
    );
    let points = count(&mask);
    if points <= ctx.tuning.min_fit_points {
        log::debug!(
            "dataset {}: auto-range window has {points} points, keeping final fit",
            ctx.dataset
        );
        return Ok(None);
    }
    log::debug!(
        "dataset {}: refitting {points} points around Eg {:.4} eV",
        ctx.dataset,
        fit.params.eg
    );
    fit_masked(ctx, cleaned, mask, &fit.params, bounds).map(Some)
}

/// `1 − sse / SStot` over `mask`; `0` when the masked data is constant.
pub fn r_squared(observed: &[f64], mask: &[bool], sse: f64) -> f64 {
    let selected: Vec<f64> = observed
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|(&y, _)| y)
        .collect();
    if selected.is_empty() {
        return 0.0;
    }
    let mean = selected.iter().sum::<f64>() / selected.len() as f64;
    let ss_tot: f64 = selected.iter().map(|y| (y - mean) * (y - mean)).sum();
    if ss_tot > 0.0 { 1.0 - sse / ss_tot } else { 0.0 }
}

/// SSE of the model against a masked subset of the data.
struct MaskedSse {
    energy: Vec<f64>,
    observed: Vec<f64>,
    workspace: RefCell<ModelWorkspace>,
}

impl MaskedSse {
    fn new(energy: &[f64], observed: &[f64], mask: &[bool]) -> Self {
        let (energy, observed) = energy
            .iter()
            .zip(observed)
            .zip(mask)
            .filter(|(_, m)| **m)
            .map(|((&e, &y), _)| (e, y))
            .unzip();
        Self {
            energy,
            observed,
            workspace: RefCell::new(ModelWorkspace::new()),
        }
    }
}

impl ObjectiveFunction for MaskedSse {
    fn eval(&self, params: &[f64]) -> f64 {
        let params = ModelParameters::from_slice(params);
        self.workspace
            .borrow_mut()
            .sse(&params, &self.energy, &self.observed)
    }
}

fn fit_masked(
    ctx: &StageContext<'_>,
    signal: &[f64],
    mask: Vec<bool>,
    seed: &ModelParameters,
    bounds: &ParamBounds,
) -> Result<StageFit, AppError> {
    let objective = MaskedSse::new(ctx.energy, signal, &mask);
    let result = ctx
        .optimizer
        .minimize(&objective, &seed.to_array(), &bounds.pairs())?;
    if !result.converged {
        log::debug!("dataset {}: {}", ctx.dataset, result.message);
    }
    let params = ModelParameters::from_slice(&result.parameters);
    let sse = objective.eval(&result.parameters);
    Ok(StageFit { params, sse, mask })
}

fn finish(
    ctx: &StageContext<'_>,
    initial_eg: f64,
    baseline: Baseline,
    cleaned: Vec<f64>,
    fit: StageFit,
    auto_range_applied: bool,
    stages: Vec<PipelineStage>,
) -> DatasetFit {
    let curves = evaluate(&fit.params, ctx.energy, &cleaned);
    let r_squared = r_squared(&cleaned, &fit.mask, fit.sse);
    let urbach = estimate_urbach(ctx.energy, &cleaned, fit.params.eg, fit.params.eb);

    DatasetFit {
        dataset: ctx.dataset,
        params: fit.params,
        sse: fit.sse,
        r_squared,
        initial_eg,
        auto_range_applied,
        raw: ctx.raw.to_vec(),
        baseline: baseline.curve,
        cleaned,
        fitted: curves.fitted,
        exciton: curves.exciton,
        band: curves.band,
        urbach,
        fit_mask: fit.mask,
        baseline_mask: baseline.mask,
        stages,
    }
}

fn range_mask(energy: &[f64], min_energy: Option<f64>, max_energy: Option<f64>) -> Vec<bool> {
    energy
        .iter()
        .map(|&e| min_energy.is_none_or(|lo| e >= lo) && max_energy.is_none_or(|hi| e <= hi))
        .collect()
}

fn count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::OptimizerConfig;

    fn axis(n: usize, lo: f64, hi: f64) -> Vec<f64> {
        (0..n).map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64).collect()
    }

    fn truth() -> ModelParameters {
        ModelParameters {
            eg: 2.62,
            eb: 0.05,
            gamma: 0.02,
            ucvsq: 37.0,
            mhcnp: 0.06,
            q: 0.0,
        }
    }

    #[test]
    fn bandgap_scan_starts_at_low_energy_end() {
        let asc = axis(11, 2.0, 3.0);
        let signal: Vec<f64> = asc.iter().map(|&e| if e > 2.45 { 1.0 } else { 0.0 }).collect();
        assert!((detect_bandgap(&asc, &signal, Orientation::Ascending, 0.01) - 2.5).abs() < 1e-12);

        let desc: Vec<f64> = asc.iter().rev().copied().collect();
        let signal: Vec<f64> = signal.iter().rev().copied().collect();
        assert!((detect_bandgap(&desc, &signal, Orientation::Descending, 0.01) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn bandgap_falls_back_to_median() {
        let e = axis(11, 2.0, 3.0);
        let flat = vec![0.005; 11];
        assert!((detect_bandgap(&e, &flat, Orientation::Ascending, 0.01) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn prelim_seed_overrides_edge_components() {
        let warm = ModelParameters {
            eg: 1.0,
            eb: 0.1,
            gamma: 0.07,
            ucvsq: 12.0,
            mhcnp: 0.2,
            q: 0.9,
        };
        let seed = prelim_seed(2.5, &warm, &PipelineTuning::default());
        assert_eq!(seed.eg, 2.5);
        assert_eq!(seed.eb, 0.05);
        assert_eq!(seed.q, 0.0);
        assert_eq!((seed.gamma, seed.ucvsq, seed.mhcnp), (0.07, 12.0, 0.2));
    }

    #[test]
    fn prelim_mask_keeps_inner_percentiles() {
        let tuning = PipelineTuning::default();
        let e = axis(101, 2.0, 3.0);
        let mask = prelim_mask(&e, &tuning);
        assert_eq!(count(&mask), 81);
        assert!(!mask[0] && !mask[100] && mask[10] && mask[90]);

        // Ten points leave eight inside the window: fall back to everything.
        let short = axis(10, 2.0, 3.0);
        assert_eq!(prelim_mask(&short, &tuning), vec![true; 10]);
    }

    #[test]
    fn user_mask_respects_limits_and_falls_back() {
        let e = axis(101, 2.0, 3.0);
        let mask = user_mask(&e, Some(2.195), Some(2.805), 10);
        assert_eq!(count(&mask), 61);
        assert_eq!(count(&user_mask(&e, None, None, 10)), 101);
        assert_eq!(count(&user_mask(&e, Some(2.96), None, 10)), 101);
    }

    #[test]
    fn auto_range_intersects_user_limits() {
        let e = axis(101, 2.0, 3.0);
        let mask = auto_range_mask(&e, 2.605, 0.5, None, None);
        assert!(mask.iter().zip(&e).all(|(&m, &x)| m == (x >= 2.105 && x <= 3.105)));
        let mask = auto_range_mask(&e, 2.605, 0.5, Some(2.3), Some(2.705));
        assert!(mask.iter().zip(&e).all(|(&m, &x)| m == (x >= 2.3 && x <= 2.705)));
    }

    #[test]
    fn r_squared_over_mask() {
        let y = vec![1.0, 2.0, 3.0, 100.0];
        let mask = vec![true, true, true, false];
        assert!((r_squared(&y, &mask, 0.0) - 1.0).abs() < 1e-12);
        assert!((r_squared(&y, &mask, 1.0) - 0.5).abs() < 1e-12);
        assert_eq!(r_squared(&[2.0, 2.0], &[true, true], 0.3), 0.0);
        assert_eq!(r_squared(&y, &[false; 4], 0.0), 0.0);
    }

    fn run(auto_range: bool, energy: &[f64], raw: &[f64]) -> DatasetFit {
        let tuning = PipelineTuning::default();
        let optimizer = LbfgsbOptimizer::new(OptimizerConfig {
            max_iter: 200,
            ..OptimizerConfig::default()
        });
        let ctx = StageContext {
            dataset: 1,
            energy,
            raw,
            orientation: Orientation::detect(energy),
            mode: BaselineMode::None,
            min_energy: None,
            max_energy: None,
            auto_range,
            tuning: &tuning,
            optimizer: &optimizer,
        };
        fit_dataset(&ctx, &ModelParameters::default()).unwrap()
    }

    #[test]
    fn machine_visits_every_stage_in_order() {
        let e = axis(60, 2.3, 2.9);
        let raw = evaluate(&truth(), &e, &vec![0.0; e.len()]).fitted;
        let fit = run(true, &e, &raw);
        assert_eq!(
            fit.stages,
            vec![
                PipelineStage::InitialBaseline,
                PipelineStage::BandgapDetect,
                PipelineStage::PrelimFit,
                PipelineStage::BaselineRefine,
                PipelineStage::FinalFit,
                PipelineStage::AutoRefine,
                PipelineStage::Done,
            ]
        );
        assert!(fit.auto_range_applied);
        assert_eq!(fit.fit_mask.len(), e.len());
        assert_eq!(fit.baseline_mask.len(), e.len());
        assert_eq!(fit.fitted.len(), e.len());
        assert!((fit.params.eg - 2.62).abs() < 0.02, "Eg = {}", fit.params.eg);
        assert!(fit.r_squared > 0.9);
    }

    #[test]
    fn disabled_auto_range_skips_its_stage() {
        let e = axis(40, 2.3, 2.9);
        let raw = evaluate(&truth(), &e, &vec![0.0; e.len()]).fitted;
        let fit = run(false, &e, &raw);
        assert!(!fit.stages.contains(&PipelineStage::AutoRefine));
        assert_eq!(fit.stages.last(), Some(&PipelineStage::Done));
        assert_eq!(fit.stages.iter().filter(|&&s| s == PipelineStage::Done).count(), 1);
        assert!(!fit.auto_range_applied);
        assert!(fit.fit_mask.iter().all(|&m| m));
    }
}
