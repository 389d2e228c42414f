//! Pre-conversion of image splits into feature splits.

use ml_dataset::{DatasetError, ShardManifest, ShardedStore};
use ml_types::{Record, SplitName};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::BottleneckCache;
use crate::error::Result;

/// Outcome of [`convert_split`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertReport {
    /// The split that was converted.
    pub split: SplitName,

    /// Feature records written.
    pub written: usize,

    /// Records that could not be decoded.
    pub corrupt: usize,

    /// Identifiers whose extraction failed, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<(String, String)>,

    /// Manifest of the written feature split.
    pub manifest: ShardManifest,
}

/// Reads an image split from `source`, resolves every image through the
/// cache and writes the feature vectors, in source order, to the same split
/// of `target`.
///
/// Feature records already in the source are copied through. Corrupt
/// records and failed extractions are counted and skipped.
///
/// # Errors
///
/// Returns an error if the source split is missing or truncated, or if
/// the target cannot be written.
pub fn convert_split(
    cache: &BottleneckCache,
    source: &ShardedStore,
    target: &ShardedStore,
    split: SplitName,
) -> Result<ConvertReport> {
    let reader = source.read(split)?;
    let mut writer = target.writer(split)?;
    let mut corrupt = 0;
    let mut failed = Vec::new();

    for next in reader {
        let record = match next {
            Ok(record) => record,
            Err(err @ DatasetError::CorruptRecord { .. }) => {
                warn!(split = %split, error = %err, "Skipping corrupt record");
                corrupt += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let vector = match record {
            Record::Feature(vector) => vector,
            Record::Image(example) => match cache.get_or_compute(&example) {
                Ok(vector) => vector,
                Err(err) if err.is_extraction_failure() => {
                    failed.push((example.id().to_string(), err.to_string()));
                    continue;
                }
                Err(err) => return Err(err),
            },
        };
        writer.append(&Record::Feature(vector))?;
    }

    let written = writer.records_written();
    let manifest = writer.finish()?;
    info!(
        split = %split,
        written,
        corrupt,
        failed = failed.len(),
        "Converted split to features"
    );

    Ok(ConvertReport {
        split,
        written,
        corrupt,
        failed,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ml_dataset::StoreConfig;
    use ml_types::{Example, ImageShape, Label, RecordKind};

    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::FeatureError;
    use crate::extractor::FnExtractor;
    use crate::store::MemoryFeatureStore;

    #[test]
    fn convert_preserves_order_and_labels() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default().without_sync();
        let images = ShardedStore::new(dir.path().join("images"), config).unwrap();
        let features = ShardedStore::new(dir.path().join("features"), config).unwrap();

        let records: Vec<Record> = (0u8..6)
            .map(|i| {
                let id = if i == 3 { "broken".to_string() } else { format!("img{i}") };
                Record::from(
                    Example::new(id, ImageShape::new(1, 1, 1), vec![i], Label::Class(u32::from(i % 2)))
                        .unwrap(),
                )
            })
            .collect();
        images.write(SplitName::Train, records).unwrap();

        let cache = BottleneckCache::open(
            Arc::new(MemoryFeatureStore::new()),
            Arc::new(FnExtractor::new(1, |ex: &Example| {
                if ex.id() == "broken" {
                    Err(FeatureError::extraction(ex.id(), "bad pixels"))
                } else {
                    Ok(vec![f32::from(ex.pixels()[0])])
                }
            })),
            CacheConfig::default().with_feature_dim(1),
        )
        .unwrap();

        let report = convert_split(&cache, &images, &features, SplitName::Train).unwrap();
        assert_eq!(report.written, 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.manifest.kind, Some(RecordKind::Feature));

        let converted: Vec<Record> = features
            .read(SplitName::Train)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let ids: Vec<&str> = converted.iter().map(Record::id).collect();
        assert_eq!(ids, vec!["img0", "img1", "img2", "img4", "img5"]);
        assert_eq!(converted[1].label(), Label::Class(1));
        assert_eq!(converted[4].as_feature().unwrap().values(), &[5.0]);
    }

    #[test]
    fn convert_missing_split_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
        let cache = BottleneckCache::open(
            Arc::new(MemoryFeatureStore::new()),
            Arc::new(FnExtractor::new(1, |_: &Example| Ok(vec![0.0]))),
            CacheConfig::default().with_feature_dim(1),
        )
        .unwrap();
        assert!(matches!(
            convert_split(&cache, &store, &store, SplitName::Test),
            Err(FeatureError::Dataset(DatasetError::SplitNotFound(_)))
        ));
    }
}
