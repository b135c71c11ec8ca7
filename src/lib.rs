//! `exciton-fit` library crate.
//!
//! Extracts bandgap, exciton binding energy, linewidth, oscillator strength,
//! mass parameter and fractional dimensionality from optical absorption
//! spectra by fitting an exciton-plus-continuum model, then estimates the
//! Urbach tail below the gap.
//!
//! The binary (`xfit`) is a thin wrapper around this library so that:
//!
//! - the fitting pipeline is testable without spawning processes
//! - the model evaluator and stage machine are reusable from other front-ends

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
