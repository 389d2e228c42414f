//! Error types for ml-types crate.

use thiserror::Error;

/// Errors that can occur when constructing data model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MlTypesError {
    /// Identifier is empty or too long to frame.
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidIdentifier {
        /// The offending identifier (possibly truncated).
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid image dimensions.
    #[error("invalid dimensions: {width}x{height}x{channels}")]
    InvalidDimensions {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Channel count.
        channels: u8,
    },

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    DataSizeMismatch {
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Invalid class label.
    #[error("invalid class label: {0}")]
    InvalidLabel(u32),

    /// Feature vector is empty or contains non-finite values.
    #[error("invalid feature vector: {0}")]
    InvalidFeatures(String),

    /// Unknown split name.
    #[error("unknown split: {0}")]
    UnknownSplit(String),
}

impl MlTypesError {
    /// Creates an invalid identifier error.
    #[must_use]
    pub fn invalid_identifier(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            id: id.chars().take(64).collect(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid dimensions error.
    #[must_use]
    pub const fn invalid_dimensions(width: u32, height: u32, channels: u8) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            channels,
        }
    }

    /// Creates a data size mismatch error.
    #[must_use]
    pub const fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::DataSizeMismatch { expected, actual }
    }

    /// Creates an invalid features error.
    #[must_use]
    pub fn invalid_features(reason: impl Into<String>) -> Self {
        Self::InvalidFeatures(reason.into())
    }

    /// Creates an unknown split error.
    #[must_use]
    pub fn unknown_split(name: impl Into<String>) -> Self {
        Self::UnknownSplit(name.into())
    }
}

/// Result type for ml-types operations.
pub type Result<T> = std::result::Result<T, MlTypesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_invalid_identifier_truncates() {
        let long = "x".repeat(500);
        let err = MlTypesError::invalid_identifier(&long, "too long");
        match &err {
            MlTypesError::InvalidIdentifier { id, .. } => assert_eq!(id.len(), 64),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn error_invalid_dimensions() {
        let err = MlTypesError::invalid_dimensions(0, 480, 3);
        assert!(err.to_string().contains("0x480x3"));
    }

    #[test]
    fn error_size_mismatch() {
        let err = MlTypesError::size_mismatch(12, 10);
        assert!(err.to_string().contains("expected 12"));
        assert!(err.to_string().contains("got 10"));
    }

    #[test]
    fn error_unknown_split() {
        let err = MlTypesError::unknown_split("kaggle");
        assert!(err.to_string().contains("kaggle"));
    }
}
