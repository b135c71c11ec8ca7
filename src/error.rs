//! Application error type.
//!
//! Only conditions that abort a run (or a single call) are errors. Degenerate
//! windows, numeric guards, and optimizer non-convergence are recovered where
//! they happen and never reach this type.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// The input file could not be read, decoded, or parsed into a numeric table.
    #[error("{0}")]
    Ingest(String),

    /// A caller-supplied setting is unsupported or out of range.
    #[error("{0}")]
    Configuration(String),

    /// Writing a CSV/JSON output failed.
    #[error("{0}")]
    Export(String),
}

impl AppError {
    pub fn ingest(message: impl Into<String>) -> Self {
        Self::Ingest(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::Export(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Ingest(_) | AppError::Configuration(_) => 2,
            AppError::Export(_) => 4,
        }
    }
}
