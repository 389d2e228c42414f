//! Bottleneck feature vectors.

use serde::{Deserialize, Serialize};

use crate::error::{MlTypesError, Result};
use crate::example::validate_id;
use crate::label::Label;

/// Fixed-length feature vector computed for one example.
///
/// The identifier is the foreign key of the [`Example`](crate::Example) it
/// was derived from; the label is propagated from it. Values must be finite
/// so a persisted vector always compares equal to the one written.
///
/// # Example
///
/// ```
/// use ml_types::{FeatureVector, Label};
///
/// let fv = FeatureVector::new("cat.1", vec![0.25, 0.5], Label::Class(0)).unwrap();
/// assert_eq!(fv.dim(), 2);
/// assert!(FeatureVector::new("cat.1", vec![f32::NAN], Label::Class(0)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    id: String,
    values: Vec<f32>,
    label: Label,
}

impl FeatureVector {
    /// Creates a validated feature vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is invalid, the vector is empty,
    /// a value is `NaN`/infinite, or the label collides with the sentinel.
    pub fn new(id: impl Into<String>, values: Vec<f32>, label: Label) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;

        if values.is_empty() {
            return Err(MlTypesError::invalid_features("vector is empty"));
        }

        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(MlTypesError::invalid_features(format!(
                "non-finite value at index {pos}"
            )));
        }

        if !label.is_valid() {
            return Err(MlTypesError::InvalidLabel(label.to_wire()));
        }

        Ok(Self { id, values, label })
    }

    /// Returns the identifier of the source example.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the feature values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Returns the vector length.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Returns the propagated label.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Consumes the vector, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_new() {
        let fv = FeatureVector::new("x", vec![1.0, -2.5, 3.0], Label::Class(1)).unwrap();
        assert_eq!(fv.id(), "x");
        assert_eq!(fv.dim(), 3);
        assert_eq!(fv.label(), Label::Class(1));
        assert_eq!(fv.values(), &[1.0, -2.5, 3.0]);
    }

    #[test]
    fn feature_rejects_empty() {
        assert!(FeatureVector::new("x", vec![], Label::Class(0)).is_err());
    }

    #[test]
    fn feature_rejects_non_finite() {
        let err = FeatureVector::new("x", vec![0.0, f32::INFINITY], Label::Class(0)).unwrap_err();
        assert!(err.to_string().contains("index 1"));
    }

    #[test]
    fn feature_rejects_empty_id() {
        assert!(FeatureVector::new("", vec![1.0], Label::Class(0)).is_err());
    }

    #[test]
    fn feature_into_values() {
        let fv = FeatureVector::new("x", vec![4.0], Label::Unlabeled).unwrap();
        assert_eq!(fv.into_values(), vec![4.0]);
    }
}
