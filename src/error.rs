//! Crate-wide error types for seispick.
//!
//! Error taxonomy:
//! - Configuration errors (bad time range, missing archive root, missing
//!   station file, malformed station id, unknown picker type) are fatal and
//!   surface before any per-unit work starts.
//! - Data absence and backend I/O failures are absorbed inside the waveform
//!   resolver and never reach this type.
//! - Inference failures are unit-local; the engine records and skips them.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Station identifier could not be parsed into network/station/location.
    #[error("Malformed station identifier: {0}")]
    StationId(String),

    /// Picker registry error (unsupported type, weights load failure).
    #[error(transparent)]
    Picker(#[from] crate::picker::PickerError),

    /// I/O operation error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Worker pool construction error.
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
