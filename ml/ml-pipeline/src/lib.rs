//! Concurrent input pipeline from sharded splits to training batches.
//!
//! This crate streams records from a [`ShardedStore`](ml_dataset::ShardedStore)
//! to a training loop:
//!
//! # Streaming
//!
//! - [`InputPipeline`] - Opens a [`BatchStream`] over one split
//! - [`BatchStream`] - Worker pool, bounded buffer and batch assembly
//! - [`ShuffleWindow`] - Bounded-memory approximate shuffle
//! - [`Batch`] - Fixed-size `(payload, label)` groups with burn conversions
//!
//! # Configuration
//!
//! - [`PipelineConfig`] - Workers, buffer capacity, window size, seed
//! - [`StreamOptions`] - Batch size, mode, shuffling, epochs
//!
//! # Consumers
//!
//! - [`BatchConsumer`] / [`feed`] - Scoped, one-directional batch sinks
//! - [`average_over_batches`] - Mean metric over an evaluation stream
//! - [`PredictionWriter`] / [`export_predictions`] - `id,label` CSV export
//! - [`RunLayout`] - Per-run logs, checkpoints and prediction files
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ml_dataset::{ShardedStore, StoreConfig};
//! use ml_pipeline::{InputPipeline, PipelineConfig, StreamOptions};
//! use ml_types::{Example, ImageShape, Label, Record, SplitName};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
//! let records = (0..100).map(|i| {
//!     Record::from(Example::new(format!("img{i}"), ImageShape::new(2, 2, 3), vec![0; 12], Label::Class(i % 2)).unwrap())
//! });
//! store.write(SplitName::Train, records).unwrap();
//!
//! let config = PipelineConfig::default().with_seed(42);
//! let pipeline = InputPipeline::new(Arc::new(store), config).unwrap();
//! let stream = pipeline
//!     .open_with(SplitName::Train, StreamOptions::new(32).with_shuffle(true).drop_incomplete())
//!     .unwrap();
//!
//! let batches: Vec<_> = stream.map(|b| b.unwrap()).collect();
//! assert_eq!(batches.len(), 3);
//! assert!(batches.iter().all(|b| b.len() == 32));
//! ```
//!
//! # Quality Standards
//!
//! - Zero clippy/doc warnings
//! - Zero `unwrap`/`expect` in library code

// Safety: Deny unwrap/expect in library code
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod batch;
mod config;
mod consumer;
mod error;
mod eval;
mod layout;
mod pipeline;
mod predict;
mod shuffle;
mod stream;
mod worker;

// Re-export streaming types
pub use batch::{Batch, BatchItem, BatchShape, Payload};
pub use pipeline::InputPipeline;
pub use shuffle::ShuffleWindow;
pub use stream::{BatchStream, StreamStats};

// Re-export configuration
pub use config::{PipelineConfig, PipelineMode, StreamOptions};

// Re-export consumers
pub use consumer::{BatchConsumer, FeedReport, feed};
pub use eval::average_over_batches;
pub use layout::RunLayout;
pub use predict::{PredictionWriter, export_predictions};

// Re-export error types
pub use error::{PipelineError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        Batch, BatchConsumer, BatchStream, InputPipeline, PipelineConfig, PipelineError,
        PipelineMode, StreamOptions, feed,
    };
}
