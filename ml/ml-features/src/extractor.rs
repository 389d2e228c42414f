//! Boundary to the feature-extractor collaborator.

use burn::module::Module;
use burn::nn;
use burn::prelude::Backend;
use burn::tensor::activation::relu;
use burn::tensor::{Tensor, TensorData};
use ml_types::{Example, ImageShape};
use parking_lot::Mutex;

use crate::error::{FeatureError, Result};

/// Computes one fixed-length feature vector from one raw image.
///
/// Implementations are called synchronously by the cache, possibly from
/// several threads at once, and must return exactly
/// [`feature_dim`](FeatureExtractor::feature_dim) values or an error.
pub trait FeatureExtractor: Send + Sync {
    /// Length of every vector this extractor returns.
    fn feature_dim(&self) -> usize;

    /// Extracts features for one example.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::Extraction`] if the example cannot be processed.
    fn extract(&self, example: &Example) -> Result<Vec<f32>>;
}

/// Adapts a closure into a [`FeatureExtractor`].
///
/// # Example
///
/// ```
/// use ml_features::{FeatureExtractor, FnExtractor};
/// use ml_types::{Example, ImageShape, Label};
///
/// let mean = FnExtractor::new(1, |ex: &Example| {
///     let sum: f32 = ex.pixels().iter().map(|&p| f32::from(p)).sum();
///     Ok(vec![sum / ex.pixels().len() as f32])
/// });
///
/// let ex = Example::new("a", ImageShape::new(2, 1, 1), vec![10, 30], Label::Class(0)).unwrap();
/// assert_eq!(mean.extract(&ex).unwrap(), vec![20.0]);
/// ```
pub struct FnExtractor<F> {
    dim: usize,
    f: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&Example) -> Result<Vec<f32>> + Send + Sync,
{
    /// Creates an extractor producing `dim` values with `f`.
    #[must_use]
    pub const fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> FeatureExtractor for FnExtractor<F>
where
    F: Fn(&Example) -> Result<Vec<f32>> + Send + Sync,
{
    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, example: &Example) -> Result<Vec<f32>> {
        (self.f)(example)
    }
}

impl<F> std::fmt::Debug for FnExtractor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExtractor")
            .field("dim", &self.dim)
            .finish_non_exhaustive()
    }
}

/// A single projection layer: Input -> Linear -> `ReLU`.
#[derive(Debug, Module)]
pub struct LinearProjection<B: Backend> {
    linear: nn::Linear<B>,
}

impl<B: Backend> LinearProjection<B> {
    /// Creates a projection from `input_dim` to `output_dim` values.
    #[must_use]
    pub fn new(input_dim: usize, output_dim: usize, device: &B::Device) -> Self {
        let linear = nn::LinearConfig::new(input_dim, output_dim).init(device);
        Self { linear }
    }

    /// Runs the forward pass on `[batch_size, input_dim]` inputs.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        relu(self.linear.forward(input))
    }
}

/// Bottleneck extractor backed by a burn module.
///
/// Pixels are flattened in HWC order and scaled to `[0, 1]` before the
/// projection. Stands in for the penultimate layer of a pretrained
/// network; swap in trained weights with [`LinearProjectionExtractor::with_model`].
///
/// # Type Parameters
///
/// - `B`: The Burn backend (e.g., `NdArray`, `Wgpu`)
#[derive(Debug)]
pub struct LinearProjectionExtractor<B: Backend> {
    model: Mutex<LinearProjection<B>>,
    device: B::Device,
    shape: ImageShape,
    dim: usize,
}

impl<B: Backend> LinearProjectionExtractor<B> {
    /// Creates an extractor with freshly initialized weights.
    #[must_use]
    pub fn new(shape: ImageShape, feature_dim: usize, device: &B::Device) -> Self {
        let model = LinearProjection::new(shape.pixel_len(), feature_dim, device);
        Self::with_model(model, shape, feature_dim, device)
    }

    /// Creates an extractor around an existing module.
    #[must_use]
    pub fn with_model(
        model: LinearProjection<B>,
        shape: ImageShape,
        feature_dim: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            device: device.clone(),
            shape,
            dim: feature_dim,
        }
    }

    /// Returns the image shape this extractor accepts.
    #[must_use]
    pub const fn shape(&self) -> ImageShape {
        self.shape
    }
}

impl<B: Backend> FeatureExtractor for LinearProjectionExtractor<B> {
    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, example: &Example) -> Result<Vec<f32>> {
        if example.shape() != self.shape {
            return Err(FeatureError::extraction(
                example.id(),
                format!("expected a {} image, got {}", self.shape, example.shape()),
            ));
        }

        let pixels: Vec<f32> = example
            .pixels()
            .iter()
            .map(|&p| f32::from(p) / 255.0)
            .collect();
        let n = pixels.len();
        let input = Tensor::<B, 2>::from_data(TensorData::new(pixels, [1, n]), &self.device);

        let output = self.model.lock().forward(input);
        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| FeatureError::extraction(example.id(), format!("{e:?}")))
    }
}
