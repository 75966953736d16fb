//! Error types for the reconciliation engine
//!
//! The taxonomy mirrors how failures are contained:
//! - `Fetch`: a storage read failed; the event's cycle is aborted after the fallback fetch
//! - `Write`: a storage write failed; the affected cluster/binding is left untouched
//! - `Validation`: one input record is malformed; it is skipped and the cycle continues

use thiserror::Error;

/// Main error type for gatekeep-rc
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Storage read error
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Storage write error during merge or promotion
    #[error("Write failed: {0}")]
    Write(String),

    /// Malformed input record
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ReconcileError {
    /// Classify a store error raised by a read
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        ReconcileError::Fetch(err.to_string())
    }

    /// Classify a store error raised by a write
    pub fn write(err: impl std::fmt::Display) -> Self {
        ReconcileError::Write(err.to_string())
    }
}

/// Convenience Result type using ReconcileError
pub type Result<T> = std::result::Result<T, ReconcileError>;
