//! Fitting orchestration.
//!
//! Responsibilities:
//!
//! - estimate and subtract the background (baseline)
//! - run the bounded optimizer through the refinement stages
//! - derive the Urbach tail from the final cleaned curve

pub mod baseline;
pub mod optimizer;
pub mod stages;
pub mod urbach;

pub use baseline::*;
pub use optimizer::*;
pub use stages::*;
pub use urbach::*;
