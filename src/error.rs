//! Typed error surface for the crate's public API.
//!
//! Every operation that can fail, public or internal, returns this same
//! `StoreError`; there is no separate internal-plumbing error type.

use std::path::PathBuf;

/// The single error type returned by every public operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector has length {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("id already present in index")]
    DuplicateId,

    #[error("training requires at least {required} vectors, got {got}")]
    InsufficientTraining { required: usize, got: usize },

    #[error("compressor has not been trained")]
    CompressorNotTrained,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported distance metric: {0}")]
    UnsupportedMetric(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted record in {file}: {reason}")]
    Corruption { file: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corruption {
            file: file.into(),
            reason: reason.into(),
        }
    }
}
