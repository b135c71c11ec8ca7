//! Physical absorption model.
//!
//! The model is implemented as a pure function of `(parameters, energy axis,
//! observed data)` so the optimizer and the reporting code can share it.

pub mod model;

pub use model::*;
