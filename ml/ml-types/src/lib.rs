//! Core data model for the image corpus pipeline.
//!
//! This crate defines the values that flow from disk to a ready-to-train
//! batch:
//!
//! # Corpus Types
//!
//! - [`Example`] - One labeled (or unlabeled) raw image with a stable identifier
//! - [`ImageShape`] - Canonical image dimensions and channel count
//! - [`Label`] - A class index or the unlabeled sentinel
//!
//! # Derived Types
//!
//! - [`FeatureVector`] - Cached bottleneck features for one example
//! - [`Record`] - Either of the above, the unit persisted in shards
//!
//! # Split Types
//!
//! - [`SplitName`] - `train`, `validation`, `test` or `unlabeled`
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with no I/O. It can be used in:
//! - Ingestion tools
//! - Training pipelines
//! - Cache population runs
//!
//! # Example
//!
//! ```
//! use ml_types::{Example, ImageShape, Label, Record};
//!
//! let shape = ImageShape::new(2, 2, 3);
//! let example = Example::new("cat.1", shape, vec![0u8; 12], Label::Class(0)).unwrap();
//!
//! let record = Record::from(example);
//! assert_eq!(record.id(), "cat.1");
//! assert!(record.label().is_labeled());
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

mod error;
mod example;
mod feature;
mod label;
mod record;
mod split;

// Re-export corpus types
pub use example::{Example, ImageShape};
pub use label::Label;

// Re-export derived types
pub use feature::FeatureVector;
pub use record::{Record, RecordKind};

// Re-export split types
pub use split::SplitName;

// Re-export error types
pub use error::{MlTypesError, Result};

/// Maximum identifier length in bytes (identifiers are framed with a `u16` length).
pub const MAX_ID_LEN: usize = u16::MAX as usize;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        Example, FeatureVector, ImageShape, Label, MlTypesError, Record, RecordKind, SplitName,
    };
}
