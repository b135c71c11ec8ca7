//! Read/write run summary JSON files.
//!
//! The summary is the portable representation of a run:
//! - input metadata (name, detected unit and orientation)
//! - both axes (as read, and in eV)
//! - per-dataset parameters, quality, Urbach tail, curves and masks
//!
//! Everything needed to re-plot a fit without re-running it.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AxisUnit, ModelParameters, Orientation, PipelineStage, RunOutput, UrbachTail};
use crate::error::AppError;

pub const TOOL_NAME: &str = "xfit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub input: InputSummary,
    /// First input column as read.
    pub axis_raw: Vec<f64>,
    pub energy_ev: Vec<f64>,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSummary {
    pub name: String,
    pub unit: AxisUnit,
    pub orientation: Orientation,
    pub points: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset: usize,
    pub params: ModelParameters,
    pub deff: f64,
    pub r_squared: f64,
    pub sse: f64,
    pub initial_eg: f64,
    pub auto_range_applied: bool,
    pub urbach: UrbachTail,
    pub curves: CurveSet,
    pub fit_mask: Vec<bool>,
    pub baseline_mask: Vec<bool>,
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSet {
    pub raw: Vec<f64>,
    pub baseline: Vec<f64>,
    pub cleaned: Vec<f64>,
    pub fitted: Vec<f64>,
    pub exciton: Vec<f64>,
    pub band: Vec<f64>,
}

impl RunSummary {
    pub fn from_run(run: &RunOutput, generated_at: DateTime<Utc>) -> Self {
        let spectrum = &run.spectrum;
        Self {
            tool: TOOL_NAME.to_string(),
            generated_at,
            input: InputSummary {
                name: spectrum.name.clone(),
                unit: spectrum.unit,
                orientation: spectrum.orientation,
                points: spectrum.len(),
                columns: spectrum.dataset_count(),
            },
            axis_raw: spectrum.axis_raw.clone(),
            energy_ev: spectrum.energy.clone(),
            datasets: run
                .fits
                .iter()
                .map(|fit| DatasetSummary {
                    dataset: fit.dataset,
                    params: fit.params,
                    deff: fit.params.deff(),
                    r_squared: fit.r_squared,
                    sse: fit.sse,
                    initial_eg: fit.initial_eg,
                    auto_range_applied: fit.auto_range_applied,
                    urbach: fit.urbach.clone(),
                    curves: CurveSet {
                        raw: fit.raw.clone(),
                        baseline: fit.baseline.clone(),
                        cleaned: fit.cleaned.clone(),
                        fitted: fit.fitted.clone(),
                        exciton: fit.exciton.clone(),
                        band: fit.band.clone(),
                    },
                    fit_mask: fit.fit_mask.clone(),
                    baseline_mask: fit.baseline_mask.clone(),
                    stages: fit.stages.clone(),
                })
                .collect(),
        }
    }
}

/// Write a summary JSON file.
pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::export(format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::export(format!("Failed to write summary JSON: {e}")))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// Read a summary JSON file.
pub fn read_summary_json(path: &Path) -> Result<RunSummary, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::ingest(format!("Failed to open summary JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::ingest(format!("Invalid summary JSON: {e}")))
}
