//! Export per-dataset fit results to CSV.
//!
//! One block per dataset: a `Dataset k` title, the parameter header with a
//! description row and a value row, then one row per energy point with the
//! raw data, baseline and model components. The axis column is written in
//! the unit of the input file.

use std::io::Write;
use std::path::Path;

use crate::domain::{AxisUnit, DatasetFit, RunOutput};
use crate::error::AppError;

/// Point columns, then an empty spacer column, then parameter columns.
const POINT_COLUMNS: usize = 6;

const PARAM_HEADERS: [&str; 10] = [
    "Eg (eV)",
    "Eb (meV)",
    "Gamma (eV)",
    "ucvsq",
    "mhcnp",
    "q",
    "Deff",
    "R²",
    "Urbach Slope",
    "Urbach Intercept",
];

const PARAM_DESCRIPTIONS: [&str; 10] = [
    "Band gap energy",
    "Exciton binding energy",
    "Linewidth (broadening)",
    "Transition dipole moment squared",
    "Mass parameter",
    "Fractional dimension parameter (0=bulk, 0.5-0.6=quasi 2D, 1.5=strong QD)",
    "Effective dimension (Deff = 3 - 2*q)",
    "Coefficient of determination",
    "Urbach tail slope",
    "Urbach tail intercept",
];

/// Write all dataset blocks of `run` to `path`.
///
/// A run without fitted datasets writes nothing.
pub fn write_results_csv(path: &Path, run: &RunOutput) -> Result<(), AppError> {
    if run.fits.is_empty() {
        log::warn!("no datasets were fitted, skipping '{}'", path.display());
        return Ok(());
    }
    let file = std::fs::File::create(path)
        .map_err(|e| AppError::export(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_results(file, run)?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// Write all dataset blocks of `run` to any writer.
pub fn write_results<W: Write>(writer: W, run: &RunOutput) -> Result<(), AppError> {
    let mut out = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    let err = |e: csv::Error| AppError::export(format!("Failed to write export CSV: {e}"));

    for (block, fit) in run.fits.iter().enumerate() {
        if block > 0 {
            out.write_record([""]).map_err(err)?;
        }
        write_block(&mut out, run, fit).map_err(err)?;
    }

    out.flush()
        .map_err(|e| AppError::export(format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

fn write_block<W: Write>(out: &mut csv::Writer<W>, run: &RunOutput, fit: &DatasetFit) -> Result<(), csv::Error> {
    let spectrum = &run.spectrum;
    let axis_header = match spectrum.unit {
        AxisUnit::Nanometer => "Wavelength (nm)",
        AxisUnit::ElectronVolt => "Photon Energy (eV)",
    };

    out.write_record([format!("Dataset {}", fit.dataset)])?;
    out.write_record([""])?;

    let mut header = vec![
        axis_header,
        "Raw Data",
        "Baseline",
        "Fitted Exciton",
        "Fitted Band",
        "Fitted Result (Band+Exciton)",
        "",
    ];
    header.extend(PARAM_HEADERS);
    out.write_record(&header)?;

    let mut descriptions = vec![""; POINT_COLUMNS + 1];
    descriptions.extend(PARAM_DESCRIPTIONS);
    out.write_record(&descriptions)?;

    let p = &fit.params;
    let mut values = vec![String::new(); POINT_COLUMNS + 1];
    values.extend(
        [
            p.eg,
            p.eb * 1000.0,
            p.gamma,
            p.ucvsq,
            p.mhcnp,
            p.q,
            p.deff(),
            fit.r_squared,
            fit.urbach.slope,
            fit.urbach.intercept,
        ]
        .iter()
        .map(|v| format!("{v:.6}")),
    );
    out.write_record(&values)?;
    out.write_record([""])?;

    let axis = match spectrum.unit {
        AxisUnit::Nanometer => &spectrum.axis_raw,
        AxisUnit::ElectronVolt => &spectrum.energy,
    };
    for i in 0..axis.len() {
        out.write_record(
            [
                axis[i],
                fit.raw[i],
                fit.baseline[i],
                fit.exciton[i],
                fit.band[i],
                fit.fitted[i],
            ]
            .iter()
            .map(|v| format!("{v:.6}")),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::summary::tests::sample_run;

    #[test]
    fn writes_one_block_per_dataset() {
        let run = sample_run();
        let mut buf = Vec::new();
        write_results(&mut buf, &run).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Dataset 1");
        assert!(lines[2].starts_with("Wavelength (nm),Raw Data,Baseline,"));
        assert!(lines[2].ends_with(",,Eg (eV),Eb (meV),Gamma (eV),ucvsq,mhcnp,q,Deff,R²,Urbach Slope,Urbach Intercept"));
        assert!(lines[4].starts_with(",,,,,,,2.620000,50.000000,"));
        // Axis column keeps the input unit.
        assert!(lines[6].starts_with("500.000000,"));
        assert_eq!(text.matches("Dataset ").count(), 2);
        assert!(text.contains("\nDataset 3\n"));
    }

    #[test]
    fn empty_run_writes_nothing() {
        let mut run = sample_run();
        run.fits.clear();
        let path = std::env::temp_dir().join(format!("exciton-fit-empty-{}.csv", std::process::id()));
        write_results_csv(&path, &run).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let run = sample_run();
        let path = std::env::temp_dir()
            .join("exciton-fit-missing-dir")
            .join("nested")
            .join("out.csv");
        let err = write_results_csv(&path, &run).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
