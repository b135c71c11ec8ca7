//! Shared "fit pipeline" logic used by the CLI and library callers.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load spectrum -> resolve datasets -> per-dataset stage machine -> RunOutput
//!
//! With warm start on, datasets are fitted strictly in order and each one is
//! seeded from the previous converged parameters. With it off, every dataset
//! starts from the default seed and the loop runs on the rayon pool.

use rayon::prelude::*;

use crate::domain::{DatasetFit, FitConfig, ModelParameters, RunOutput, Spectrum};
use crate::error::AppError;
use crate::fit::{LbfgsbOptimizer, StageContext, fit_dataset};
use crate::io::load_spectrum;

/// Seed carried from one dataset to the next.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WarmStart {
    pub seed: ModelParameters,
}

impl WarmStart {
    /// Next accumulator after `fit` converged.
    pub fn after(self, fit: &DatasetFit) -> Self {
        Self { seed: fit.params }
    }
}

/// Load `config.input_path` and fit the selected datasets.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let spectrum = load_spectrum(&config.input_path)?;
    fit_spectrum(spectrum, config)
}

/// Fit an already loaded spectrum.
pub fn fit_spectrum(spectrum: Spectrum, config: &FitConfig) -> Result<RunOutput, AppError> {
    config.tuning.validate()?;
    let datasets = resolve_datasets(&spectrum, config.datasets.as_deref())?;
    let fits = fit_datasets(&spectrum, &datasets, config)?;
    Ok(RunOutput { spectrum, fits })
}

/// 1-based dataset indices to fit, in order.
pub fn resolve_datasets(spectrum: &Spectrum, requested: Option<&[usize]>) -> Result<Vec<usize>, AppError> {
    let available = spectrum.dataset_count();
    let Some(requested) = requested else {
        return Ok((1..=available).collect());
    };
    if requested.is_empty() {
        return Err(AppError::config("Empty dataset selection."));
    }
    for &k in requested {
        if k == 0 || k > available {
            return Err(AppError::config(format!(
                "Dataset index {k} is out of range (the spectrum has {available} dataset(s), indices start at 1)."
            )));
        }
    }
    Ok(requested.to_vec())
}

fn fit_datasets(spectrum: &Spectrum, datasets: &[usize], config: &FitConfig) -> Result<Vec<DatasetFit>, AppError> {
    let optimizer = LbfgsbOptimizer::new(config.optimizer);

    if config.warm_start {
        let mut fits = Vec::with_capacity(datasets.len());
        let mut warm = WarmStart::default();
        for &k in datasets {
            let fit = fit_one(spectrum, k, config, &optimizer, &warm.seed)?;
            warm = warm.after(&fit);
            fits.push(fit);
        }
        Ok(fits)
    } else {
        let seed = ModelParameters::default();
        datasets
            .par_iter()
            .map(|&k| fit_one(spectrum, k, config, &optimizer, &seed))
            .collect()
    }
}

fn fit_one(
    spectrum: &Spectrum,
    k: usize,
    config: &FitConfig,
    optimizer: &LbfgsbOptimizer,
    seed: &ModelParameters,
) -> Result<DatasetFit, AppError> {
    let raw = spectrum
        .dataset(k)
        .ok_or_else(|| AppError::config(format!("Dataset index {k} is out of range.")))?;
    let ctx = StageContext::from_config(config, optimizer, k, &spectrum.energy, raw, spectrum.orientation);
    let fit = fit_dataset(&ctx, seed)?;
    log::info!(
        "dataset {k}: Eg={:.4} eV, Eb={:.1} meV, Deff={:.3}, R2={:.4}",
        fit.params.eg,
        fit.params.eb * 1000.0,
        fit.params.deff(),
        fit.r_squared
    );
    Ok(fit)
}
