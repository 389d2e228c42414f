//! Class labels.

use serde::{Deserialize, Serialize};

/// Label of an example: a class index, or the unlabeled sentinel.
///
/// On the wire the unlabeled sentinel is `u32::MAX`, so that value is not
/// a valid class index.
///
/// # Example
///
/// ```
/// use ml_types::Label;
///
/// assert!(Label::Class(1).is_labeled());
/// assert_eq!(Label::from_wire(u32::MAX), Label::Unlabeled);
/// assert_eq!(Label::Class(3).to_wire(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    /// A known class index.
    Class(u32),

    /// No label (e.g. a held-out prediction corpus).
    Unlabeled,
}

impl Label {
    /// Wire value of the unlabeled sentinel.
    pub const UNLABELED_WIRE: u32 = u32::MAX;

    /// Returns `true` for class labels.
    #[must_use]
    pub const fn is_labeled(&self) -> bool {
        matches!(self, Self::Class(_))
    }

    /// Returns the class index, if any.
    #[must_use]
    pub const fn class(&self) -> Option<u32> {
        match self {
            Self::Class(c) => Some(*c),
            Self::Unlabeled => None,
        }
    }

    /// Returns `true` if this label can be framed without colliding with
    /// the sentinel.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        match self {
            Self::Class(c) => *c != Self::UNLABELED_WIRE,
            Self::Unlabeled => true,
        }
    }

    /// Encodes the label as its wire value.
    #[must_use]
    pub const fn to_wire(&self) -> u32 {
        match self {
            Self::Class(c) => *c,
            Self::Unlabeled => Self::UNLABELED_WIRE,
        }
    }

    /// Decodes a wire value.
    #[must_use]
    pub const fn from_wire(value: u32) -> Self {
        if value == Self::UNLABELED_WIRE {
            Self::Unlabeled
        } else {
            Self::Class(value)
        }
    }

    /// Returns the label as a binary training target (`1.0` for class 1 and
    /// above, `0.0` otherwise).
    #[must_use]
    pub const fn as_binary_target(&self) -> f32 {
        match self {
            Self::Class(c) if *c > 0 => 1.0,
            _ => 0.0,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class(c) => write!(f, "{c}"),
            Self::Unlabeled => write!(f, "unlabeled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_sentinel() {
        assert_eq!(Label::from_wire(Label::Unlabeled.to_wire()), Label::Unlabeled);
        assert_eq!(Label::from_wire(Label::Class(7).to_wire()), Label::Class(7));
    }

    #[test]
    fn sentinel_class_is_invalid() {
        assert!(!Label::Class(u32::MAX).is_valid());
        assert!(Label::Class(0).is_valid());
        assert!(Label::Unlabeled.is_valid());
    }

    #[test]
    fn binary_target() {
        assert!((Label::Class(0).as_binary_target() - 0.0).abs() < f32::EPSILON);
        assert!((Label::Class(1).as_binary_target() - 1.0).abs() < f32::EPSILON);
        assert!((Label::Unlabeled.as_binary_target() - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn display() {
        assert_eq!(Label::Class(2).to_string(), "2");
        assert_eq!(Label::Unlabeled.to_string(), "unlabeled");
    }

    #[test]
    fn ordering_puts_classes_first() {
        let mut labels = vec![Label::Unlabeled, Label::Class(1), Label::Class(0)];
        labels.sort();
        assert_eq!(labels, vec![Label::Class(0), Label::Class(1), Label::Unlabeled]);
    }
}
