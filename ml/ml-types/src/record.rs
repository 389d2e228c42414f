//! Persisted record type.

use serde::{Deserialize, Serialize};

use crate::example::Example;
use crate::feature::FeatureVector;
use crate::label::Label;

/// Kind of payload a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Raw image bytes.
    Image,

    /// Precomputed feature vector.
    Feature,
}

impl RecordKind {
    /// Returns the kind name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Feature => "feature",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One unit of shard storage: an example or its feature vector.
///
/// # Example
///
/// ```
/// use ml_types::{FeatureVector, Label, Record, RecordKind};
///
/// let fv = FeatureVector::new("a", vec![1.0], Label::Class(0)).unwrap();
/// let record = Record::from(fv);
/// assert_eq!(record.kind(), RecordKind::Feature);
/// assert!(record.as_feature().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    /// A raw image.
    Image(Example),

    /// A feature vector.
    Feature(FeatureVector),
}

impl Record {
    /// Returns the identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Image(e) => e.id(),
            Self::Feature(f) => f.id(),
        }
    }

    /// Returns the label.
    #[must_use]
    pub const fn label(&self) -> Label {
        match self {
            Self::Image(e) => e.label(),
            Self::Feature(f) => f.label(),
        }
    }

    /// Returns the payload kind.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Image(_) => RecordKind::Image,
            Self::Feature(_) => RecordKind::Feature,
        }
    }

    /// Returns the example if this is an image record.
    #[must_use]
    pub const fn as_image(&self) -> Option<&Example> {
        match self {
            Self::Image(e) => Some(e),
            Self::Feature(_) => None,
        }
    }

    /// Returns the feature vector if this is a feature record.
    #[must_use]
    pub const fn as_feature(&self) -> Option<&FeatureVector> {
        match self {
            Self::Feature(f) => Some(f),
            Self::Image(_) => None,
        }
    }
}

impl From<Example> for Record {
    fn from(example: Example) -> Self {
        Self::Image(example)
    }
}

impl From<FeatureVector> for Record {
    fn from(vector: FeatureVector) -> Self {
        Self::Feature(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageShape;

    #[test]
    fn record_accessors_image() {
        let ex = Example::new("img", ImageShape::new(1, 1, 1), vec![9], Label::Class(2)).unwrap();
        let record = Record::from(ex);
        assert_eq!(record.id(), "img");
        assert_eq!(record.label(), Label::Class(2));
        assert_eq!(record.kind(), RecordKind::Image);
        assert!(record.as_image().is_some());
        assert!(record.as_feature().is_none());
    }

    #[test]
    fn record_accessors_feature() {
        let fv = FeatureVector::new("fv", vec![0.5], Label::Unlabeled).unwrap();
        let record = Record::from(fv);
        assert_eq!(record.id(), "fv");
        assert_eq!(record.label(), Label::Unlabeled);
        assert_eq!(record.kind(), RecordKind::Feature);
    }

    #[test]
    fn record_kind_display() {
        assert_eq!(RecordKind::Image.to_string(), "image");
        assert_eq!(RecordKind::Feature.to_string(), "feature");
    }

    #[test]
    fn record_kind_serialization() {
        let json = serde_json::to_string(&RecordKind::Feature).unwrap();
        assert_eq!(json, "\"feature\"");
    }
}
