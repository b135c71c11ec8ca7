//! Command-line parsing for the exciton absorption fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "xfit", version, about = "Exciton + continuum absorption edge fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every (or selected) absorption column of a spectrum file and print the results.
    Fit(FitArgs),
    /// Write a synthetic spectrum drawn from the model, for testing and demos.
    Synth(SynthArgs),
}

/// Options for fitting a spectrum file.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Spectrum table: first column energy (eV) or wavelength (nm), one absorption column per dataset.
    #[arg(value_name = "FILE")]
    pub input: PathBuf,

    /// Baseline model: 0 = none, 1 = linear, 2 = Rayleigh a*E^4.
    #[arg(short = 'b', long, default_value_t = 2)]
    pub baseline_mode: u8,

    /// 1-based dataset indices to fit, e.g. `1,3` (default: all).
    #[arg(short = 'd', long, value_delimiter = ',')]
    pub datasets: Option<Vec<usize>>,

    /// Lower energy limit (eV) of the fit window.
    #[arg(long)]
    pub min_energy: Option<f64>,

    /// Upper energy limit (eV) of the fit window.
    #[arg(long)]
    pub max_energy: Option<f64>,

    /// Skip the refit restricted to Eg +/- half-width.
    #[arg(long)]
    pub no_auto_range: bool,

    /// Start every dataset from the default seed instead of the previous dataset's result.
    #[arg(long)]
    pub no_warm_start: bool,

    /// Lower energy percentile of the preliminary fit window.
    #[arg(long, default_value_t = 10.0)]
    pub prelim_low_pct: f64,

    /// Upper energy percentile of the preliminary fit window.
    #[arg(long, default_value_t = 90.0)]
    pub prelim_high_pct: f64,

    /// Absorption level that marks the initial bandgap estimate.
    #[arg(long, default_value_t = 0.01)]
    pub bandgap_threshold: f64,

    /// Half-width (eV) of the auto-range window around the fitted Eg.
    #[arg(long, default_value_t = 0.5)]
    pub auto_range_half_width: f64,

    /// Maximum optimizer iterations per fit.
    #[arg(long, default_value_t = 1000)]
    pub max_iter: u64,

    /// Export per-dataset parameters and curves to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the full run (parameters, curves, masks) to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,
}

/// Options for generating a synthetic spectrum.
#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Output file (`.csv` is comma-separated, anything else tab-separated).
    #[arg(value_name = "OUT")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 200)]
    pub points: usize,

    /// Lower end of the energy grid (eV).
    #[arg(long, default_value_t = 2.3)]
    pub e_min: f64,

    /// Upper end of the energy grid (eV).
    #[arg(long, default_value_t = 2.9)]
    pub e_max: f64,

    #[arg(long, default_value_t = 2.62)]
    pub eg: f64,

    #[arg(long, default_value_t = 0.05)]
    pub eb: f64,

    #[arg(long, default_value_t = 0.01)]
    pub gamma: f64,

    #[arg(long, default_value_t = 37.0)]
    pub ucvsq: f64,

    #[arg(long, default_value_t = 0.06)]
    pub mhcnp: f64,

    #[arg(long, default_value_t = 0.0)]
    pub q: f64,

    /// Rayleigh background coefficient `a` in a*E^4.
    #[arg(long, default_value_t = 0.002)]
    pub rayleigh: f64,

    /// Standard deviation of the Gaussian noise.
    #[arg(long, default_value_t = 0.005)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 3)]
    pub seed: u64,

    /// Number of absorption columns.
    #[arg(long, default_value_t = 1)]
    pub datasets: usize,

    /// Write rows from high to low energy.
    #[arg(long)]
    pub descending: bool,

    /// Write the first column as wavelength (nm).
    #[arg(long)]
    pub nm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::try_parse_from([
            "xfit",
            "fit",
            "film.csv",
            "--baseline-mode",
            "1",
            "--datasets",
            "1,3",
            "--no-auto-range",
            "--export-json",
            "run.json",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.input, PathBuf::from("film.csv"));
        assert_eq!(args.baseline_mode, 1);
        assert_eq!(args.datasets, Some(vec![1, 3]));
        assert!(args.no_auto_range);
        assert!(!args.no_warm_start);
        assert_eq!(args.max_iter, 1000);
        assert_eq!(args.export_json, Some(PathBuf::from("run.json")));
    }

    #[test]
    fn synth_defaults() {
        let cli = Cli::try_parse_from(["xfit", "synth", "out.txt", "--nm"]).unwrap();
        let Command::Synth(args) = cli.command else {
            panic!("expected synth");
        };
        assert_eq!(args.points, 200);
        assert_eq!(args.seed, 3);
        assert_eq!(args.gamma, 0.01);
        assert!(args.nm);
        assert!(!args.descending);
    }

    #[test]
    fn prelim_window_help_names_energy_percentiles() {
        use clap::CommandFactory;

        let mut cmd = Cli::command();
        let fit = cmd.find_subcommand_mut("fit").unwrap();
        let help = fit.render_long_help().to_string();
        assert!(help.contains("Lower energy percentile"));
        assert!(help.contains("Upper energy percentile"));
        assert!(!help.contains("absorption percentile"));
    }

    #[test]
    fn fit_requires_input() {
        assert!(Cli::try_parse_from(["xfit", "fit"]).is_err());
    }
}
