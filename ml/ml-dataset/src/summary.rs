//! Class balance statistics.

use std::collections::BTreeMap;

use ml_types::Label;
use serde::{Deserialize, Serialize};

/// Per-class example counts for a split or corpus.
///
/// Used to log and verify that stratified splits mirror the corpus
/// class balance.
///
/// # Example
///
/// ```
/// use ml_dataset::ClassBalance;
/// use ml_types::Label;
///
/// let labels = [Label::Class(0), Label::Class(1), Label::Class(1), Label::Unlabeled];
/// let balance = ClassBalance::from_labels(labels);
///
/// assert_eq!(balance.total, 4);
/// assert_eq!(balance.count(Label::Class(1)), 2);
/// // Unlabeled examples are left out of class fractions
/// assert!((balance.fraction(Label::Class(1)) - 2.0 / 3.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassBalance {
    /// Total number of examples.
    pub total: usize,

    /// Count per label, sorted by label (unlabeled last).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_counts: Vec<(Label, usize)>,
}

impl ClassBalance {
    /// Counts the given labels.
    #[must_use]
    pub fn from_labels(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        let mut total = 0;
        for label in labels {
            *counts.entry(label).or_insert(0) += 1;
            total += 1;
        }
        Self {
            total,
            class_counts: counts.into_iter().collect(),
        }
    }

    /// Returns true if no examples were counted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Returns the count for a label.
    #[must_use]
    pub fn count(&self, label: Label) -> usize {
        self.class_counts
            .iter()
            .find(|(l, _)| *l == label)
            .map_or(0, |(_, n)| *n)
    }

    /// Returns the fraction of labeled examples with this label.
    ///
    /// Unlabeled examples are excluded from the denominator, so class
    /// fractions of a labeled split sum to one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self, label: Label) -> f64 {
        let labeled = self.labeled_total();
        if labeled == 0 {
            return 0.0;
        }
        self.count(label) as f64 / labeled as f64
    }

    /// Returns the number of labeled examples.
    #[must_use]
    pub fn labeled_total(&self) -> usize {
        self.class_counts
            .iter()
            .filter(|(l, _)| l.is_labeled())
            .map(|(_, n)| n)
            .sum()
    }

    /// Returns the number of distinct classes (excluding unlabeled).
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_counts
            .iter()
            .filter(|(l, _)| l.is_labeled())
            .count()
    }

    /// Returns the largest absolute difference between this balance's class
    /// fractions and `reference`'s, over the classes of either.
    #[must_use]
    pub fn max_deviation(&self, reference: &Self) -> f64 {
        self.class_counts
            .iter()
            .chain(&reference.class_counts)
            .filter(|(l, _)| l.is_labeled())
            .map(|(l, _)| (self.fraction(*l) - reference.fraction(*l)).abs())
            .fold(0.0, f64::max)
    }

    /// Combines two balances.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut counts: BTreeMap<Label, usize> = self.class_counts.iter().copied().collect();
        for (label, n) in &other.class_counts {
            *counts.entry(*label).or_insert(0) += n;
        }
        Self {
            total: self.total + other.total,
            class_counts: counts.into_iter().collect(),
        }
    }

    /// Returns a one-line report, e.g. `"100 examples: 0=50 (50.0%), 1=50 (50.0%)"`.
    #[must_use]
    pub fn to_report(&self) -> String {
        let parts: Vec<String> = self
            .class_counts
            .iter()
            .map(|(label, n)| {
                if label.is_labeled() {
                    format!("{label}={n} ({:.1}%)", self.fraction(*label) * 100.0)
                } else {
                    format!("{label}={n}")
                }
            })
            .collect();
        if parts.is_empty() {
            format!("{} examples", self.total)
        } else {
            format!("{} examples: {}", self.total, parts.join(", "))
        }
    }
}
