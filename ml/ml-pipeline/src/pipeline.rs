//! Input pipeline entry point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize};

use ml_dataset::ShardedStore;
use ml_features::BottleneckCache;
use ml_types::{RecordKind, SplitName};
use tracing::info;

use crate::config::{PipelineConfig, PipelineMode, StreamOptions};
use crate::error::{PipelineError, Result};
use crate::shuffle::ShuffleWindow;
use crate::stream::{BatchStream, StreamParts};
use crate::worker::{PoolSettings, TaskPlan, spawn_workers};

/// Salt separating the window seed from the shard-order seed.
const WINDOW_SALT: u64 = 0x5DEE_CE66_D1CE_4E5B;

/// Opens batch streams over the splits of a [`ShardedStore`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use ml_dataset::{ShardedStore, StoreConfig};
/// use ml_pipeline::{InputPipeline, PipelineConfig, PipelineMode};
/// use ml_types::{Example, ImageShape, Label, Record, SplitName};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ShardedStore::new(dir.path(), StoreConfig::default()).unwrap();
/// let records = (0..10).map(|i| {
///     Record::from(Example::new(format!("img{i}"), ImageShape::new(1, 1, 1), vec![0], Label::Class(0)).unwrap())
/// });
/// store.write(SplitName::Train, records).unwrap();
///
/// let pipeline = InputPipeline::new(Arc::new(store), PipelineConfig::default()).unwrap();
/// let mut stream = pipeline.open(SplitName::Train, 4, PipelineMode::Raw, false).unwrap();
///
/// let sizes: Vec<usize> = stream.by_ref().map(|b| b.unwrap().len()).collect();
/// assert_eq!(sizes, vec![4, 4, 2]);
/// stream.close().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct InputPipeline {
    store: Arc<ShardedStore>,
    cache: Option<Arc<BottleneckCache>>,
    config: PipelineConfig,
}

impl InputPipeline {
    /// Creates a pipeline without a feature cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(store: Arc<ShardedStore>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            cache: None,
            config,
        })
    }

    /// Attaches a feature cache used to resolve image splits in
    /// [`PipelineMode::Feature`].
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<BottleneckCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    /// Opens a single-epoch stream.
    ///
    /// # Errors
    ///
    /// See [`open_with`](Self::open_with).
    pub fn open(
        &self,
        split: SplitName,
        batch_size: usize,
        mode: PipelineMode,
        shuffle: bool,
    ) -> Result<BatchStream> {
        let options = StreamOptions::new(batch_size)
            .with_mode(mode)
            .with_shuffle(shuffle);
        self.open_with(split, options)
    }

    /// Opens a stream with full options and starts its workers.
    ///
    /// Each call reads the split from the beginning.
    ///
    /// # Errors
    ///
    /// Fails fast when:
    /// - the options are invalid
    /// - the split directory is missing or unreadable
    /// - raw mode is requested on a feature split
    /// - feature mode is requested on an image split without an open cache
    /// - a worker thread cannot be spawned
    pub fn open_with(&self, split: SplitName, options: StreamOptions) -> Result<BatchStream> {
        options.validate()?;
        let shards = self.store.shard_order(split, None)?;
        let kind = self.store.record_kind(split)?;

        let cache = match (options.mode, kind) {
            (PipelineMode::Raw, Some(RecordKind::Feature)) => {
                return Err(PipelineError::invalid_config(format!(
                    "split {split} holds feature vectors; open it in feature mode"
                )));
            }
            (PipelineMode::Feature, Some(RecordKind::Image)) => {
                let cache = self.cache.clone().ok_or_else(|| {
                    PipelineError::invalid_config(format!(
                        "split {split} holds images; feature mode needs a bottleneck cache"
                    ))
                })?;
                if cache.is_closed() {
                    return Err(PipelineError::invalid_config("bottleneck cache is closed"));
                }
                Some(cache)
            }
            _ => None,
        };

        let seed = self.config.seed.unwrap_or_else(rand::random);
        let plan = Arc::new(TaskPlan::new(
            shards,
            options.shuffle.then_some(seed),
            options.num_epochs,
        ));
        let total_tasks = plan.total_tasks();

        let settings = PoolSettings {
            workers: self.config.workers,
            buffer_capacity: self.config.buffer_capacity,
            mode: options.mode,
            cache,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let pool = spawn_workers(&plan, &settings, &stop, &active)?;

        info!(
            split = %split,
            mode = %options.mode,
            batch_size = options.batch_size,
            shuffle = options.shuffle,
            workers = pool.handles.len(),
            "Opened batch stream"
        );

        let window = options
            .shuffle
            .then(|| ShuffleWindow::new(self.config.shuffle_window, Some(seed ^ WINDOW_SALT)));

        Ok(BatchStream::new(StreamParts {
            split,
            options,
            strict: self.config.strict,
            pool,
            stop,
            active,
            total_tasks,
            window,
        }))
    }
}

#[cfg(test)]
mod tests {
    use ml_dataset::{DatasetError, StoreConfig};
    use ml_types::{Example, FeatureVector, ImageShape, Label, Record};

    use super::*;

    fn store(dir: &std::path::Path) -> Arc<ShardedStore> {
        Arc::new(ShardedStore::new(dir, StoreConfig::default().without_sync()).unwrap())
    }

    fn images(n: usize) -> impl Iterator<Item = Record> {
        (0..n).map(|i| {
            Record::from(
                Example::new(format!("img{i:03}"), ImageShape::new(1, 1, 1), vec![0], Label::Class(0))
                    .unwrap(),
            )
        })
    }

    #[test]
    fn open_missing_split_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = InputPipeline::new(store(dir.path()), PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.open(SplitName::Validation, 8, PipelineMode::Raw, false),
            Err(PipelineError::Dataset(DatasetError::SplitNotFound(_)))
        ));
    }

    #[test]
    fn open_rejects_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write(SplitName::Train, images(3)).unwrap();
        let pipeline = InputPipeline::new(store, PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.open(SplitName::Train, 0, PipelineMode::Raw, false),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InputPipeline::new(store(dir.path()), PipelineConfig::default().with_workers(0)).is_err());
    }

    #[test]
    fn feature_mode_on_images_needs_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write(SplitName::Train, images(3)).unwrap();
        let pipeline = InputPipeline::new(store, PipelineConfig::default()).unwrap();
        assert!(matches!(
            pipeline.open(SplitName::Train, 2, PipelineMode::Feature, false),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn raw_mode_on_features_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let vectors = (0..3).map(|i| {
            Record::from(FeatureVector::new(format!("f{i}"), vec![0.0; 4], Label::Class(1)).unwrap())
        });
        store.write(SplitName::Test, vectors).unwrap();
        let pipeline = InputPipeline::new(store, PipelineConfig::default()).unwrap();

        assert!(pipeline.open(SplitName::Test, 2, PipelineMode::Raw, false).is_err());
        let mut stream = pipeline.open(SplitName::Test, 2, PipelineMode::Feature, false).unwrap();
        let batch = stream.next_batch().unwrap().unwrap();
        assert_eq!(batch.shape, crate::BatchShape::Features(4));
    }

    #[test]
    fn empty_split_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write(SplitName::Unlabeled, images(0)).unwrap();
        let pipeline = InputPipeline::new(store, PipelineConfig::default()).unwrap();

        let mut stream = pipeline.open(SplitName::Unlabeled, 4, PipelineMode::Raw, false).unwrap();
        assert_eq!(stream.active_workers(), 0);
        assert!(stream.next_batch().unwrap().is_none());
    }

    #[test]
    fn epochs_repeat_the_split() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write(SplitName::Train, images(5)).unwrap();
        let pipeline = InputPipeline::new(store, PipelineConfig::default().with_workers(2)).unwrap();

        let options = StreamOptions::new(5).with_epochs(3);
        let batches: Vec<_> = pipeline
            .open_with(SplitName::Train, options)
            .unwrap()
            .map(|b| b.unwrap())
            .collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].ids(), batches[2].ids());
        assert_eq!(batches[2].index, 2);
    }
}
