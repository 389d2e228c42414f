//! Error types for ml-pipeline crate.

use ml_dataset::DatasetError;
use ml_features::FeatureError;
use thiserror::Error;

/// Errors that can occur in ml-pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline or stream configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage error (missing split, corrupt record, truncated shard, ...).
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Feature cache error.
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// The stream was used after being closed.
    #[error("batch stream is closed")]
    Closed,

    /// Worker threads panicked.
    #[error("{0} pipeline worker(s) panicked")]
    WorkerPanicked(usize),

    /// A record does not fit the stream (wrong shape, dimension or kind).
    #[error("record {id} rejected: {reason}")]
    RecordMismatch {
        /// Record identifier.
        id: String,
        /// Reason for rejection.
        reason: String,
    },

    /// A batch consumer failed.
    #[error("batch consumer failed: {0}")]
    Consumer(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates a record mismatch error.
    #[must_use]
    pub fn record_mismatch(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RecordMismatch {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a consumer error.
    #[must_use]
    pub fn consumer(reason: impl Into<String>) -> Self {
        Self::Consumer(reason.into())
    }

    /// Returns `true` if the error affects a single record, which a
    /// non-strict stream skips.
    #[must_use]
    pub const fn is_record_level(&self) -> bool {
        match self {
            Self::Dataset(err) => err.is_record_level(),
            Self::Feature(err) => err.is_extraction_failure(),
            Self::RecordMismatch { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for ml-pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
