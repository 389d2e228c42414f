//! Batches handed to the training loop.

use burn::prelude::Backend;
use burn::tensor::{Tensor, TensorData};
use ml_types::{ImageShape, Label, Record, SplitName};
use serde::{Deserialize, Serialize};

/// Payload carried by one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Raw pixels in HWC order.
    Image(Vec<u8>),

    /// Feature vector values.
    Features(Vec<f32>),
}

/// The fixed payload shape of every item in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchShape {
    /// Images of one canonical shape.
    Image(ImageShape),

    /// Feature vectors of one length.
    Features(usize),
}

impl BatchShape {
    /// Returns the shape of a record's payload.
    #[must_use]
    pub fn of(record: &Record) -> Self {
        match record {
            Record::Image(example) => Self::Image(example.shape()),
            Record::Feature(vector) => Self::Features(vector.dim()),
        }
    }
}

impl std::fmt::Display for BatchShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image(shape) => write!(f, "image {shape}"),
            Self::Features(dim) => write!(f, "{dim} features"),
        }
    }
}

/// One `(payload, label)` pair with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Example identifier.
    pub id: String,

    /// Label (unlabeled for predict streams).
    pub label: Label,

    /// Image or feature payload.
    pub payload: Payload,
}

impl From<Record> for BatchItem {
    fn from(record: Record) -> Self {
        match record {
            Record::Image(example) => Self {
                id: example.id().to_string(),
                label: example.label(),
                payload: Payload::Image(example.into_pixels()),
            },
            Record::Feature(vector) => Self {
                id: vector.id().to_string(),
                label: vector.label(),
                payload: Payload::Features(vector.into_values()),
            },
        }
    }
}

/// An ordered group of records drawn from one split.
///
/// All items share [`Batch::shape`]. Batches are produced by a
/// [`BatchStream`](crate::BatchStream) and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Split the records were drawn from.
    pub split: SplitName,

    /// Zero-based position of this batch in its stream.
    pub index: usize,

    /// Shared payload shape.
    pub shape: BatchShape,

    /// The records.
    pub items: Vec<BatchItem>,
}

impl Batch {
    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the batch has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item identifiers in order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }

    /// Returns the item labels in order.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// Converts image payloads into a `[N, C, H, W]` tensor scaled to `[0, 1]`.
    ///
    /// Returns `None` for a feature batch.
    #[must_use]
    pub fn images_tensor<B: Backend>(&self, device: &B::Device) -> Option<Tensor<B, 4>> {
        let BatchShape::Image(shape) = self.shape else {
            return None;
        };
        let (w, h, c) = (
            shape.width as usize,
            shape.height as usize,
            usize::from(shape.channels),
        );

        let mut values = Vec::with_capacity(self.len() * shape.pixel_len());
        for item in &self.items {
            let Payload::Image(pixels) = &item.payload else {
                return None;
            };
            // HWC -> CHW
            for channel in 0..c {
                for y in 0..h {
                    for x in 0..w {
                        values.push(f32::from(pixels[(y * w + x) * c + channel]) / 255.0);
                    }
                }
            }
        }

        Some(Tensor::from_data(
            TensorData::new(values, [self.len(), c, h, w]),
            device,
        ))
    }

    /// Converts feature payloads into a `[N, D]` tensor.
    ///
    /// Returns `None` for an image batch.
    #[must_use]
    pub fn features_tensor<B: Backend>(&self, device: &B::Device) -> Option<Tensor<B, 2>> {
        let BatchShape::Features(dim) = self.shape else {
            return None;
        };

        let mut values = Vec::with_capacity(self.len() * dim);
        for item in &self.items {
            let Payload::Features(features) = &item.payload else {
                return None;
            };
            values.extend_from_slice(features);
        }

        Some(Tensor::from_data(
            TensorData::new(values, [self.len(), dim]),
            device,
        ))
    }

    /// Converts labels into a `[N, 1]` tensor of binary targets.
    #[must_use]
    pub fn labels_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let targets: Vec<f32> = self
            .items
            .iter()
            .map(|item| item.label.as_binary_target())
            .collect();
        Tensor::from_data(TensorData::new(targets, [self.len(), 1]), device)
    }
}
