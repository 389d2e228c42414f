//! Corpus ingestion: split a corpus and persist every split.

use std::collections::BTreeMap;

use ml_types::{Example, Record, SplitName};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DatasetError, Result};
use crate::splits::{SplitPlan, SplitRatios, split_examples};
use crate::summary::ClassBalance;
use crate::warehouse::{ShardManifest, ShardedStore};

/// Outcome of [`ingest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The split assignment that was written.
    pub plan: SplitPlan,

    /// Class balance of the whole corpus.
    pub corpus: ClassBalance,

    /// Manifest of every split, including empty ones.
    pub manifests: BTreeMap<SplitName, ShardManifest>,
}

impl IngestReport {
    /// Returns the class balance written to a split.
    #[must_use]
    pub fn balance(&self, split: SplitName) -> Option<&ClassBalance> {
        self.manifests.get(&split).and_then(|m| m.summary.as_ref())
    }

    /// Returns the largest class-fraction deviation of any labeled split
    /// from the corpus.
    #[must_use]
    pub fn max_deviation(&self) -> f64 {
        SplitName::LABELED
            .iter()
            .filter_map(|split| self.balance(*split))
            .filter(|balance| !balance.is_empty())
            .map(|balance| balance.max_deviation(&self.corpus))
            .fold(0.0, f64::max)
    }
}

/// Splits `examples` with [`split_examples`] and writes all four splits to
/// `store`, in plan order.
///
/// Every split directory is created, even when it receives no records, so
/// later pipelines can open it.
///
/// # Errors
///
/// Returns an error if the corpus is empty, a split already holds shards,
/// splitting fails, or a write fails.
pub fn ingest(
    store: &ShardedStore,
    examples: Vec<Example>,
    ratios: SplitRatios,
    seed: u64,
) -> Result<IngestReport> {
    if examples.is_empty() {
        return Err(DatasetError::EmptyDataset);
    }

    for split in SplitName::ALL {
        if store.has_split(split) && !store.shard_set(split)?.shard_paths()?.is_empty() {
            return Err(DatasetError::validation(format!(
                "split {split} already holds shards in {}",
                store.root().display()
            )));
        }
    }

    let corpus = ClassBalance::from_labels(examples.iter().map(Example::label));
    let plan = split_examples(&examples, ratios, seed)?;
    let parts = plan.partition(examples)?;

    let mut manifests = BTreeMap::new();
    for (split, examples) in parts {
        let manifest = store.write(split, examples.into_iter().map(Record::from))?;
        if let Some(balance) = &manifest.summary {
            info!(split = %split, balance = %balance.to_report(), "Ingested split");
        }
        manifests.insert(split, manifest);
    }

    info!(
        root = %store.root().display(),
        corpus = %corpus.to_report(),
        "Ingested corpus"
    );

    Ok(IngestReport {
        plan,
        corpus,
        manifests,
    })
}

#[cfg(test)]
mod tests {
    use ml_types::{ImageShape, Label};

    use super::*;
    use crate::config::StoreConfig;

    fn corpus(n: u32) -> Vec<Example> {
        (0..n)
            .map(|i| {
                let label = if i % 10 == 9 {
                    Label::Unlabeled
                } else {
                    Label::Class(i % 2)
                };
                #[allow(clippy::cast_possible_truncation)]
                let pixel = i as u8;
                Example::new(format!("img{i:03}"), ImageShape::new(2, 2, 3), vec![pixel; 12], label)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn ingest_writes_every_split() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedStore::new(dir.path(), StoreConfig::default().without_sync()).unwrap();

        let report = ingest(&store, corpus(200), SplitRatios::DEFAULT, 42).unwrap();
        assert_eq!(report.manifests.len(), 4);
        assert_eq!(report.corpus.total, 200);
        assert_eq!(report.manifests[&SplitName::Unlabeled].total_records, 20);

        for split in SplitName::ALL {
            let ids: Vec<String> = store
                .read(split)
                .unwrap()
                .map(|r| r.unwrap().id().to_string())
                .collect();
            assert_eq!(ids, report.plan.ids(split));
        }
        assert!(report.max_deviation() < 0.1);
    }

    #[test]
    fn ingest_refuses_populated_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedStore::new(dir.path(), StoreConfig::default().without_sync()).unwrap();
        ingest(&store, corpus(20), SplitRatios::DEFAULT, 1).unwrap();
        assert!(matches!(
            ingest(&store, corpus(20), SplitRatios::DEFAULT, 1),
            Err(DatasetError::Validation(_))
        ));
    }

    #[test]
    fn ingest_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
        assert!(matches!(
            ingest(&store, Vec::new(), SplitRatios::DEFAULT, 0),
            Err(DatasetError::EmptyDataset)
        ));
    }
}
