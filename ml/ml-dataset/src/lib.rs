//! Record codec, splitting and sharded storage for image corpora.
//!
//! This crate moves a corpus from memory to disk:
//!
//! # Record Codec
//!
//! - [`codec::encode`] / [`codec::decode`] - Self-delimiting binary frames
//!   for [`Record`](ml_types::Record)s, checksummed with CRC-32
//!
//! # Splitting
//!
//! - [`split_corpus`] - Deterministic stratified train/validation/test split
//! - [`SplitPlan`] - The resulting identifier lists
//! - [`ClassBalance`] - Per-class counts used to check stratification
//!
//! # Sharded Storage
//!
//! - [`ShardedStore`] - One directory of rotating shard files per split
//! - [`ShardWriter`] / [`SplitReader`] - Append-only writes, lazy reads
//! - [`ShardManifest`] - Per-split index of shards with checksums
//!
//! # Ingestion
//!
//! - [`ingest`] - Split a corpus and write all four splits
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with no framework dependencies. It can be used in:
//! - Ingestion tools
//! - Training pipelines
//! - Dataset validation tools
//!
//! # Example
//!
//! ```
//! use ml_dataset::{ShardedStore, SplitRatios, StoreConfig, ingest};
//! use ml_types::{Example, ImageShape, Label, SplitName};
//!
//! let examples: Vec<Example> = (0..40)
//!     .map(|i| {
//!         Example::new(format!("img{i}"), ImageShape::new(1, 1, 1), vec![0], Label::Class(i % 2))
//!             .unwrap()
//!     })
//!     .collect();
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
//! let report = ingest(&store, examples, SplitRatios::DEFAULT, 42).unwrap();
//!
//! assert_eq!(report.plan.train.len(), 32);
//! assert_eq!(store.read(SplitName::Train).unwrap().count(), 32);
//! ```
//!
//! # Quality Standards
//!
//! - Zero clippy/doc warnings
//! - Zero `unwrap`/`expect` in library code

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod codec;
mod config;
mod error;
mod ingest;
mod splits;
mod summary;
mod warehouse;

// Re-export split utilities
pub use splits::{
    CorpusEntry, SplitPlan, SplitRatios, SplitUnderflowWarning, split_corpus, split_examples,
};

// Re-export summary types
pub use summary::ClassBalance;

// Re-export warehouse types
pub use warehouse::{
    MANIFEST_FILE, RecordLocation, SHARD_EXTENSION, ShardManifest, ShardMetadata, ShardReader,
    ShardSet, ShardWriter, ShardedStore, SplitReader, parse_shard_index, permute_shards,
    shard_file_name,
};

// Re-export configuration
pub use config::{DEFAULT_SHARD_SIZE_BYTES, StoreConfig};

// Re-export ingestion
pub use ingest::{IngestReport, ingest};

// Re-export error types
pub use error::{DatasetError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        ClassBalance, CorpusEntry, DatasetError, IngestReport, RecordLocation, ShardManifest,
        ShardSet, ShardedStore, SplitPlan, SplitRatios, SplitUnderflowWarning, StoreConfig,
        ingest, split_corpus,
    };
}
