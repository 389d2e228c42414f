//! Bottleneck feature cache for image corpora.
//!
//! Feature vectors ("bottlenecks") are expensive to compute, so they are
//! computed once per image and reused across epochs:
//!
//! # Cache
//!
//! - [`BottleneckCache`] - At-most-once extraction per identifier
//! - [`CacheConfig`] / [`CacheStats`] - Configuration and counters
//!
//! # Storage
//!
//! - [`FeatureStore`] - Injected write-once backend
//! - [`MemoryFeatureStore`] - In-memory backend
//! - [`ShardedFeatureStore`] - Shard files with an identifier index
//!
//! # Extraction
//!
//! - [`FeatureExtractor`] - Boundary to the extractor collaborator
//! - [`LinearProjectionExtractor`] - Burn-backed extractor
//!
//! # Conversion
//!
//! - [`convert_split`] - Rewrite an image split as a feature split
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ml_features::{BottleneckCache, CacheConfig, FnExtractor, ShardedFeatureStore};
//! use ml_types::{Example, ImageShape, Label};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = CacheConfig::default().with_feature_dim(1);
//! let store = ShardedFeatureStore::open(dir.path(), config.store_config()).unwrap();
//! let extractor = FnExtractor::new(1, |ex: &Example| Ok(vec![f32::from(ex.pixels()[0])]));
//!
//! let cache = BottleneckCache::open(Arc::new(store), Arc::new(extractor), config).unwrap();
//! let ex = Example::new("a", ImageShape::new(1, 1, 1), vec![3], Label::Class(0)).unwrap();
//! assert_eq!(cache.get_or_compute(&ex).unwrap().values(), &[3.0]);
//! cache.close().unwrap();
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

mod cache;
mod convert;
mod error;
mod extractor;
mod store;

// Re-export cache types
pub use cache::{
    BottleneckCache, CacheConfig, CacheStats, DEFAULT_FEATURE_DIM, PopulateReport, Resolution,
};

// Re-export storage backends
pub use store::{FeatureStore, MemoryFeatureStore, ShardedFeatureStore};

// Re-export extractors
pub use extractor::{FeatureExtractor, FnExtractor, LinearProjection, LinearProjectionExtractor};

// Re-export conversion
pub use convert::{ConvertReport, convert_split};

// Re-export error types
pub use error::{FeatureError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        BottleneckCache, CacheConfig, CacheStats, FeatureError, FeatureExtractor, FeatureStore,
        FnExtractor, MemoryFeatureStore, ShardedFeatureStore, convert_split,
    };
}
