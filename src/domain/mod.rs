//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - input configuration (`BaselineMode`, `PipelineTuning`, `FitConfig`)
//! - the loaded table (`Spectrum`, `AxisUnit`, `Orientation`)
//! - model parameters and bounds (`ModelParameters`, `ParamBounds`)
//! - fit outputs (`DatasetFit`, `UrbachTail`, `PipelineStage`)

pub mod types;

pub use types::*;
