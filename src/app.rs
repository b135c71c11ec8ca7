//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the spectrum and fits each dataset
//! - prints the report
//! - writes optional exports

use clap::Parser;

use crate::cli::{Command, FitArgs, SynthArgs};
use crate::data::{SyntheticConfig, generate_spectrum, write_spectrum};
use crate::domain::{BaselineMode, FitConfig, ModelParameters, PipelineTuning};
use crate::error::AppError;
use crate::fit::OptimizerConfig;

pub mod pipeline;

/// Entry point for the `xfit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_run_summary(&run, &config));

    // Optional exports.
    if let Some(path) = &config.export_results {
        crate::io::export::write_results_csv(path, &run)?;
    }
    if let Some(path) = &config.export_json {
        let summary = crate::io::summary::RunSummary::from_run(&run, chrono::Utc::now());
        crate::io::summary::write_summary_json(path, &summary)?;
    }

    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let config = synthetic_config_from_args(&args);
    let spectrum = generate_spectrum(&config)?;
    write_spectrum(&args.output, &spectrum)
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let tuning = PipelineTuning {
        prelim_low_pct: args.prelim_low_pct,
        prelim_high_pct: args.prelim_high_pct,
        bandgap_threshold: args.bandgap_threshold,
        auto_range_half_width: args.auto_range_half_width,
        ..PipelineTuning::default()
    };
    tuning.validate()?;

    Ok(FitConfig {
        input_path: args.input.clone(),
        baseline_mode: BaselineMode::from_code(args.baseline_mode)?,
        datasets: args.datasets.clone(),
        min_energy: args.min_energy,
        max_energy: args.max_energy,
        auto_range: !args.no_auto_range,
        warm_start: !args.no_warm_start,
        tuning,
        optimizer: OptimizerConfig {
            max_iter: args.max_iter,
            ..OptimizerConfig::default()
        },
        export_results: args.export.clone(),
        export_json: args.export_json.clone(),
    })
}

pub fn synthetic_config_from_args(args: &SynthArgs) -> SyntheticConfig {
    SyntheticConfig {
        points: args.points,
        e_min: args.e_min,
        e_max: args.e_max,
        truth: ModelParameters {
            eg: args.eg,
            eb: args.eb,
            gamma: args.gamma,
            ucvsq: args.ucvsq,
            mhcnp: args.mhcnp,
            q: args.q,
        },
        rayleigh: args.rayleigh,
        noise: args.noise,
        seed: args.seed,
        datasets: args.datasets,
        descending: args.descending,
        wavelength_axis: args.nm,
    }
}
