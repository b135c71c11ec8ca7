//! Input/output helpers.
//!
//! - spectrum file ingest + normalization (`ingest`)
//! - per-dataset CSV result export (`export`)
//! - run summary JSON read/write (`summary`)

pub mod export;
pub mod ingest;
pub mod summary;

pub use export::*;
pub use ingest::*;
pub use summary::*;
