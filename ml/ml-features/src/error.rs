//! Error types for ml-features crate.

use ml_dataset::DatasetError;
use thiserror::Error;

/// Errors that can occur in ml-features operations.
#[derive(Debug, Clone, Error)]
pub enum FeatureError {
    /// The extractor failed for an identifier; nothing was cached.
    #[error("feature extraction failed for {id}: {reason}")]
    Extraction {
        /// Example identifier.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The extractor returned a vector of the wrong length.
    #[error("feature dimension mismatch for {id}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Example identifier.
        id: String,
        /// Configured feature dimension.
        expected: usize,
        /// Length of the returned vector.
        got: usize,
    },

    /// An entry for this identifier is already stored; entries are final.
    #[error("feature vector already stored: {0}")]
    AlreadyStored(String),

    /// The cache was closed.
    #[error("feature cache is closed")]
    Closed,

    /// Underlying storage error.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl FeatureError {
    /// Creates an extraction error.
    #[must_use]
    pub fn extraction(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a dimension mismatch error.
    #[must_use]
    pub fn dimension_mismatch(id: impl Into<String>, expected: usize, got: usize) -> Self {
        Self::DimensionMismatch {
            id: id.into(),
            expected,
            got,
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Returns `true` if the extractor (rather than storage) failed.
    #[must_use]
    pub const fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            Self::Extraction { .. } | Self::DimensionMismatch { .. }
        )
    }
}

impl From<std::io::Error> for FeatureError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FeatureError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for ml-features operations.
pub type Result<T> = std::result::Result<T, FeatureError>;
