//! Mathematical utilities: guarded special functions and least squares.

pub mod ols;
pub mod special;

pub use ols::*;
pub use special::*;
