//! Deterministic stratified dataset splitting.

use std::collections::{BTreeMap, HashMap, HashSet};

use ml_types::{Example, Label, SplitName};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DatasetError, Result};

/// Tolerance on the ratio sum.
const RATIO_SUM_TOLERANCE: f32 = 1e-6;

/// Ratios for splitting labeled data into train/validation/test.
///
/// # Example
///
/// ```
/// use ml_dataset::SplitRatios;
///
/// let ratios = SplitRatios::DEFAULT;
/// assert!((ratios.train() - 0.80).abs() < 1e-6);
/// assert!((ratios.validation() - 0.05).abs() < 1e-6);
/// assert!((ratios.test() - 0.15).abs() < 1e-6);
///
/// assert!(SplitRatios::try_new(0.5, 0.5, 0.5).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    train: f32,
    validation: f32,
    test: f32,
}

impl SplitRatios {
    /// 80% train, 5% validation, 15% test.
    pub const DEFAULT: Self = Self {
        train: 0.80,
        validation: 0.05,
        test: 0.15,
    };

    /// Creates new split ratios.
    ///
    /// # Panics
    ///
    /// Panics if the ratios are invalid (see [`SplitRatios::try_new`]).
    #[must_use]
    pub fn new(train: f32, validation: f32, test: f32) -> Self {
        assert!(
            Self::valid(train, validation, test),
            "Split ratios must be in [0, 1], train > 0, and sum to 1; got {train}/{validation}/{test}"
        );
        Self {
            train,
            validation,
            test,
        }
    }

    /// Creates split ratios, returning `None` if any ratio is outside
    /// `[0, 1]`, `train` is zero, or the ratios do not sum to one.
    #[must_use]
    pub fn try_new(train: f32, validation: f32, test: f32) -> Option<Self> {
        Self::valid(train, validation, test).then_some(Self {
            train,
            validation,
            test,
        })
    }

    fn valid(train: f32, validation: f32, test: f32) -> bool {
        let in_range = |r: f32| (0.0..=1.0).contains(&r);
        in_range(train)
            && in_range(validation)
            && in_range(test)
            && train > 0.0
            && (train + validation + test - 1.0).abs() <= RATIO_SUM_TOLERANCE
    }

    /// Validates ratios that were deserialized rather than constructed.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidSplitRatio`] if the ratios are invalid.
    pub fn validate(&self) -> Result<()> {
        if Self::valid(self.train, self.validation, self.test) {
            Ok(())
        } else {
            Err(DatasetError::invalid_split_ratio(format!(
                "{}/{}/{} (each in [0, 1], train > 0, sum = 1)",
                self.train, self.validation, self.test
            )))
        }
    }

    /// Returns the training ratio.
    #[must_use]
    pub const fn train(&self) -> f32 {
        self.train
    }

    /// Returns the validation ratio.
    #[must_use]
    pub const fn validation(&self) -> f32 {
        self.validation
    }

    /// Returns the test ratio.
    #[must_use]
    pub const fn test(&self) -> f32 {
        self.test
    }

    /// Returns the combined held-out ratio.
    #[must_use]
    pub fn held_out(&self) -> f32 {
        self.validation + self.test
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Identifier and label of one corpus member, the splitter's input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Stable identifier.
    pub id: String,

    /// Class label or unlabeled sentinel.
    pub label: Label,
}

impl CorpusEntry {
    /// Creates a corpus entry.
    #[must_use]
    pub fn new(id: impl Into<String>, label: Label) -> Self {
        Self {
            id: id.into(),
            label,
        }
    }
}

impl From<&Example> for CorpusEntry {
    fn from(example: &Example) -> Self {
        Self::new(example.id(), example.label())
    }
}

/// A class too small to split proportionally; it was placed in `train`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitUnderflowWarning {
    /// The class that underflowed.
    pub label: u32,

    /// Number of examples in the class.
    pub count: usize,
}

impl std::fmt::Display for SplitUnderflowWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "class {} has only {} examples; placed entirely in train",
            self.label, self.count
        )
    }
}

/// Result of splitting a corpus: the identifier list of every split.
///
/// The plan is the single source of truth for split membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    /// Seed the plan was produced with.
    pub seed: u64,

    /// Ratios the plan was produced with.
    pub ratios: SplitRatios,

    /// Training identifiers.
    pub train: Vec<String>,

    /// Validation identifiers.
    pub validation: Vec<String>,

    /// Test identifiers.
    pub test: Vec<String>,

    /// Unlabeled identifiers, in corpus order.
    pub unlabeled: Vec<String>,

    /// Classes that were too small to split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<SplitUnderflowWarning>,
}

impl SplitPlan {
    /// Returns the identifiers assigned to `split`.
    #[must_use]
    pub fn ids(&self, split: SplitName) -> &[String] {
        match split {
            SplitName::Train => &self.train,
            SplitName::Validation => &self.validation,
            SplitName::Test => &self.test,
            SplitName::Unlabeled => &self.unlabeled,
        }
    }

    /// Returns the total number of identifiers across all splits.
    #[must_use]
    pub fn len(&self) -> usize {
        SplitName::ALL.iter().map(|s| self.ids(*s).len()).sum()
    }

    /// Returns true if the plan holds no identifiers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds an identifier → split lookup table.
    #[must_use]
    pub fn assignments(&self) -> HashMap<&str, SplitName> {
        SplitName::ALL
            .iter()
            .flat_map(|split| self.ids(*split).iter().map(move |id| (id.as_str(), *split)))
            .collect()
    }

    /// Returns the split an identifier was assigned to.
    #[must_use]
    pub fn split_of(&self, id: &str) -> Option<SplitName> {
        SplitName::ALL
            .into_iter()
            .find(|split| self.ids(*split).iter().any(|x| x == id))
    }

    /// Distributes examples into their splits, in plan order.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Validation`] if an example is not part of the plan.
    pub fn partition(&self, examples: Vec<Example>) -> Result<BTreeMap<SplitName, Vec<Example>>> {
        let mut position: HashMap<&str, (SplitName, usize)> = HashMap::with_capacity(self.len());
        for split in SplitName::ALL {
            for (i, id) in self.ids(split).iter().enumerate() {
                position.insert(id.as_str(), (split, i));
            }
        }

        let mut slots: BTreeMap<SplitName, Vec<Option<Example>>> = SplitName::ALL
            .into_iter()
            .map(|s| (s, vec![None; self.ids(s).len()]))
            .collect();

        for example in examples {
            let Some(&(split, i)) = position.get(example.id()) else {
                return Err(DatasetError::validation(format!(
                    "example {} is not part of the split plan",
                    example.id()
                )));
            };
            if let Some(slot) = slots.get_mut(&split).and_then(|v| v.get_mut(i)) {
                *slot = Some(example);
            }
        }

        Ok(slots
            .into_iter()
            .map(|(split, v)| (split, v.into_iter().flatten().collect()))
            .collect())
    }
}

/// Splits a corpus into train/validation/test (labeled) and unlabeled.
///
/// Labeled entries are grouped by class, each class is sorted and shuffled
/// with a seed derived from `seed`, and cut at the ratio boundaries. Global
/// split sizes are `round(n * train)` and `round(n * validation)` with the
/// rest going to test; the per-class share is apportioned by largest
/// remainder so every split mirrors the corpus class balance. Identical
/// arguments always produce an identical plan.
///
/// A class whose held-out share rounds to zero is placed entirely in
/// `train` and reported as a [`SplitUnderflowWarning`].
///
/// # Errors
///
/// Returns an error if an identifier appears twice or the ratios are invalid.
///
/// # Example
///
/// ```
/// use ml_dataset::{CorpusEntry, SplitRatios, split_corpus};
/// use ml_types::Label;
///
/// let corpus: Vec<CorpusEntry> = (0..100)
///     .map(|i| CorpusEntry::new(format!("img{i}"), Label::Class(i % 2)))
///     .collect();
///
/// let plan = split_corpus(&corpus, SplitRatios::DEFAULT, 42).unwrap();
/// assert_eq!(plan.train.len(), 80);
/// assert_eq!(plan.validation.len(), 5);
/// assert_eq!(plan.test.len(), 15);
/// ```
pub fn split_corpus(entries: &[CorpusEntry], ratios: SplitRatios, seed: u64) -> Result<SplitPlan> {
    ratios.validate()?;

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(DatasetError::DuplicateIdentifier(entry.id.clone()));
        }
    }

    let mut strata: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    let mut unlabeled = Vec::new();
    for entry in entries {
        match entry.label {
            Label::Class(c) => strata.entry(c).or_default().push(entry.id.clone()),
            Label::Unlabeled => unlabeled.push(entry.id.clone()),
        }
    }

    let mut warnings = Vec::new();
    let mut eligible: Vec<(u32, Vec<String>)> = Vec::new();
    let mut train = Vec::new();

    for (class, mut ids) in strata {
        ids.sort_unstable();
        ids.shuffle(&mut stratum_rng(seed, class));

        if underflows(ids.len(), ratios) {
            let warning = SplitUnderflowWarning {
                label: class,
                count: ids.len(),
            };
            warn!(label = class, count = ids.len(), "{warning}");
            warnings.push(warning);
            train.extend(ids);
        } else {
            eligible.push((class, ids));
        }
    }

    let sizes: Vec<usize> = eligible.iter().map(|(_, ids)| ids.len()).collect();
    let counts = apportion_strata(&sizes, ratios);

    let mut validation = Vec::new();
    let mut test = Vec::new();
    for ((_, ids), (n_train, n_val)) in eligible.into_iter().zip(counts) {
        let mut ids = ids.into_iter();
        train.extend(ids.by_ref().take(n_train));
        validation.extend(ids.by_ref().take(n_val));
        test.extend(ids);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed.rotate_left(32) ^ COMBINE_SALT);
    train.shuffle(&mut rng);
    validation.shuffle(&mut rng);
    test.shuffle(&mut rng);

    info!(
        seed,
        train = train.len(),
        validation = validation.len(),
        test = test.len(),
        unlabeled = unlabeled.len(),
        underflows = warnings.len(),
        "Split corpus"
    );

    Ok(SplitPlan {
        seed,
        ratios,
        train,
        validation,
        test,
        unlabeled,
        warnings,
    })
}

/// Splits examples directly (see [`split_corpus`]).
///
/// # Errors
///
/// Same as [`split_corpus`].
pub fn split_examples(examples: &[Example], ratios: SplitRatios, seed: u64) -> Result<SplitPlan> {
    let entries: Vec<CorpusEntry> = examples.iter().map(CorpusEntry::from).collect();
    split_corpus(&entries, ratios, seed)
}

const COMBINE_SALT: u64 = 0x5DEE_CE66_D1CE_4E5B;

fn stratum_rng(seed: u64, class: u32) -> ChaCha8Rng {
    let mix = (u64::from(class) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    ChaCha8Rng::seed_from_u64(seed ^ mix)
}

#[allow(clippy::cast_precision_loss)]
fn underflows(count: usize, ratios: SplitRatios) -> bool {
    let held_out = f64::from(ratios.held_out());
    held_out > 0.0 && (count as f64 * held_out).round() < 1.0
}

/// Returns `(train, validation)` counts per stratum; test gets the rest.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn apportion_strata(sizes: &[usize], ratios: SplitRatios) -> Vec<(usize, usize)> {
    let total: usize = sizes.iter().sum();
    if total == 0 {
        return vec![(0, 0); sizes.len()];
    }

    let r_train = f64::from(ratios.train());
    let r_val = f64::from(ratios.validation());

    let train_quota = ((total as f64 * r_train).round() as usize).min(total);
    let val_quota = ((total as f64 * r_val).round() as usize).min(total - train_quota);

    // Extra slots granted so far, shared across splits so ties alternate strata
    let mut extras = vec![0usize; sizes.len()];

    let train = apportion(sizes, sizes, r_train, train_quota, &mut extras);
    let caps: Vec<usize> = sizes.iter().zip(&train).map(|(n, t)| n - t).collect();
    let val = apportion(sizes, &caps, r_val, val_quota, &mut extras);

    train.into_iter().zip(val).collect()
}

/// Largest-remainder apportionment of `quota` slots over strata.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn apportion(
    sizes: &[usize],
    caps: &[usize],
    ratio: f64,
    quota: usize,
    extras: &mut [usize],
) -> Vec<usize> {
    let ideal: Vec<f64> = sizes.iter().map(|&n| n as f64 * ratio).collect();
    let mut counts: Vec<usize> = ideal
        .iter()
        .zip(caps)
        .map(|(x, &cap)| (x.floor() as usize).min(cap))
        .collect();

    let mut assigned: usize = counts.iter().sum();
    while assigned > quota {
        let Some(i) = (0..counts.len()).max_by_key(|&i| (counts[i], std::cmp::Reverse(i))) else {
            break;
        };
        counts[i] -= 1;
        assigned -= 1;
    }

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = ideal[a] - ideal[a].floor();
        let rb = ideal[b] - ideal[b].floor();
        rb.total_cmp(&ra)
            .then(extras[a].cmp(&extras[b]))
            .then(a.cmp(&b))
    });

    while assigned < quota {
        let mut progressed = false;
        for &i in &order {
            if assigned == quota {
                break;
            }
            if counts[i] < caps[i] {
                counts[i] += 1;
                extras[i] += 1;
                assigned += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    counts
}
