//! Dataset split names.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MlTypesError;

/// Name of a dataset split.
///
/// Labeled examples belong to exactly one of `train`, `validation` and
/// `test`; unlabeled examples all belong to `unlabeled`.
///
/// # Example
///
/// ```
/// use ml_types::SplitName;
///
/// let split: SplitName = "validation".parse().unwrap();
/// assert_eq!(split, SplitName::Validation);
/// assert_eq!(split.as_str(), "validation");
/// assert!(split.is_labeled());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SplitName {
    /// Training split.
    #[default]
    Train,

    /// Validation split.
    Validation,

    /// Test split.
    Test,

    /// Unlabeled (prediction) split.
    Unlabeled,
}

impl SplitName {
    /// All splits in storage order.
    pub const ALL: [Self; 4] = [Self::Train, Self::Validation, Self::Test, Self::Unlabeled];

    /// Splits holding labeled data.
    pub const LABELED: [Self; 3] = [Self::Train, Self::Validation, Self::Test];

    /// Returns the split name, also used as its directory name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
            Self::Unlabeled => "unlabeled",
        }
    }

    /// Returns `true` for the three labeled splits.
    #[must_use]
    pub const fn is_labeled(&self) -> bool {
        !matches!(self, Self::Unlabeled)
    }
}

impl std::fmt::Display for SplitName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SplitName {
    type Err = MlTypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "validation" | "valid" | "val" => Ok(Self::Validation),
            "test" => Ok(Self::Test),
            "unlabeled" => Ok(Self::Unlabeled),
            _ => Err(MlTypesError::unknown_split(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parse() {
        assert_eq!("train".parse::<SplitName>().unwrap(), SplitName::Train);
        assert_eq!("VAL".parse::<SplitName>().unwrap(), SplitName::Validation);
        assert_eq!("test".parse::<SplitName>().unwrap(), SplitName::Test);
        assert_eq!(" unlabeled ".parse::<SplitName>().unwrap(), SplitName::Unlabeled);
        assert!("kaggle".parse::<SplitName>().is_err());
    }

    #[test]
    fn split_display_round_trip() {
        for split in SplitName::ALL {
            assert_eq!(split.to_string().parse::<SplitName>().unwrap(), split);
        }
    }

    #[test]
    fn split_labeled() {
        assert!(SplitName::LABELED.iter().all(SplitName::is_labeled));
        assert!(!SplitName::Unlabeled.is_labeled());
    }

    #[test]
    fn split_serialization() {
        let json = serde_json::to_string(&SplitName::Validation).unwrap();
        assert_eq!(json, "\"validation\"");
    }
}
