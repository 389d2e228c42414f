//! Error types for ml-dataset crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in ml-dataset operations.
#[derive(Debug, Clone, Error)]
pub enum DatasetError {
    /// Record bytes are malformed (bad checksum, bad layout, invalid values).
    #[error("corrupt record: {reason}")]
    CorruptRecord {
        /// Reason for rejection.
        reason: String,
    },

    /// Shard file ends in the middle of a record.
    #[error(
        "truncated shard {}: record at byte {offset} is incomplete ({records_read} complete records before it)",
        path.display()
    )]
    TruncatedShard {
        /// Shard file path.
        path: PathBuf,
        /// Byte offset of the incomplete record.
        offset: u64,
        /// Number of complete records read before the truncation point.
        records_read: usize,
    },

    /// Record is too large to frame.
    #[error("record too large: {size} bytes exceeds u32::MAX")]
    RecordTooLarge {
        /// Body size in bytes.
        size: usize,
    },

    /// Split directory does not exist or is unreadable.
    #[error("split not found: {0}")]
    SplitNotFound(String),

    /// Shard not found.
    #[error("shard not found: {0}")]
    ShardNotFound(String),

    /// Shard contents do not match the manifest checksum.
    #[error("checksum mismatch for {shard}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Shard file name.
        shard: String,
        /// Checksum recorded in the manifest.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// Invalid split ratios.
    #[error("invalid split ratios: {0}")]
    InvalidSplitRatio(String),

    /// The same identifier appears twice in a corpus.
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// Empty dataset.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Invalid manifest.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

impl DatasetError {
    /// Creates a corrupt record error.
    #[must_use]
    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            reason: reason.into(),
        }
    }

    /// Creates a truncated shard error.
    #[must_use]
    pub fn truncated_shard(path: impl Into<PathBuf>, offset: u64, records_read: usize) -> Self {
        Self::TruncatedShard {
            path: path.into(),
            offset,
            records_read,
        }
    }

    /// Creates a split not found error.
    #[must_use]
    pub fn split_not_found(name: impl Into<String>) -> Self {
        Self::SplitNotFound(name.into())
    }

    /// Creates a shard not found error.
    #[must_use]
    pub fn shard_not_found(id: impl Into<String>) -> Self {
        Self::ShardNotFound(id.into())
    }

    /// Creates an invalid split ratio error.
    #[must_use]
    pub fn invalid_split_ratio(reason: impl Into<String>) -> Self {
        Self::InvalidSplitRatio(reason.into())
    }

    /// Creates an invalid manifest error.
    #[must_use]
    pub fn invalid_manifest(reason: impl Into<String>) -> Self {
        Self::InvalidManifest(reason.into())
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an IO error.
    #[must_use]
    pub fn io(reason: impl Into<String>) -> Self {
        Self::Io(reason.into())
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Returns `true` if the error only affects a single record, so a
    /// stream can skip it and keep going.
    #[must_use]
    pub const fn is_record_level(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for ml-dataset operations.
pub type Result<T> = std::result::Result<T, DatasetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_corrupt_record() {
        let err = DatasetError::corrupt_record("crc mismatch");
        assert!(err.to_string().contains("corrupt record"));
        assert!(err.to_string().contains("crc mismatch"));
        assert!(err.is_record_level());
    }

    #[test]
    fn error_truncated_shard() {
        let err = DatasetError::truncated_shard("/data/train/shard-00000.rec", 4096, 12);
        let msg = err.to_string();
        assert!(msg.contains("shard-00000.rec"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("12 complete records"));
        assert!(!err.is_record_level());
    }

    #[test]
    fn error_split_not_found() {
        let err = DatasetError::split_not_found("validation");
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn error_checksum_mismatch() {
        let err = DatasetError::ChecksumMismatch {
            shard: "shard-00001.rec".to_string(),
            expected: "deadbeef".to_string(),
            actual: "00000000".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn error_invalid_split_ratio() {
        let err = DatasetError::invalid_split_ratio("ratios sum to 1.2");
        assert!(err.to_string().contains("1.2"));
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: DatasetError = io_err.into();
        assert!(matches!(err, DatasetError::Io(_)));
    }

    #[test]
    fn error_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: DatasetError = json_err.into();
        assert!(matches!(err, DatasetError::Serialization(_)));
    }
}
