//! Storage backends for cached feature vectors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ml_dataset::{
    DatasetError, RecordLocation, ShardReader, ShardSet, ShardWriter, StoreConfig,
};
use ml_types::{FeatureVector, Record};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{FeatureError, Result};

/// Keyed, write-once storage for feature vectors.
///
/// An entry is either absent or final: [`put`](FeatureStore::put) of an
/// identifier that is already stored fails with
/// [`FeatureError::AlreadyStored`].
pub trait FeatureStore: Send + Sync {
    /// Looks up a vector by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, id: &str) -> Result<Option<FeatureVector>>;

    /// Stores a new vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is already stored or the write fails.
    fn put(&self, vector: FeatureVector) -> Result<()>;

    /// Returns the number of stored vectors.
    fn len(&self) -> usize;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every stored vector durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> Result<()>;
}

/// In-memory feature store, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    entries: RwLock<HashMap<String, FeatureVector>>,
}

impl MemoryFeatureStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn get(&self, id: &str) -> Result<Option<FeatureVector>> {
        Ok(self.entries.read().get(id).cloned())
    }

    fn put(&self, vector: FeatureVector) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(vector.id()) {
            return Err(FeatureError::AlreadyStored(vector.id().to_string()));
        }
        entries.insert(vector.id().to_string(), vector);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Feature store persisted as a shard set.
///
/// Vectors are appended as feature records to rotating shard files.
/// Opening the store scans the shards once to build an
/// identifier → location index, so later lookups read a single frame.
/// Vectors written since the last [`flush`](FeatureStore::flush) are
/// served from memory.
pub struct ShardedFeatureStore {
    set: ShardSet,
    config: StoreConfig,
    index: RwLock<HashMap<String, RecordLocation>>,
    pending: RwLock<HashMap<String, (RecordLocation, FeatureVector)>>,
    writer: Mutex<Option<ShardWriter>>,
}

impl std::fmt::Debug for ShardedFeatureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedFeatureStore")
            .field("dir", &self.set.dir())
            .field("indexed", &self.index.read().len())
            .field("pending", &self.pending.read().len())
            .finish_non_exhaustive()
    }
}

/// Manifest name of a persisted feature store.
const STORE_NAME: &str = "features";

impl ShardedFeatureStore {
    /// Opens (or creates) a store directory and indexes its shards.
    ///
    /// A truncated shard tail left by an interrupted population run is
    /// logged and ignored; entries before it stay usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read, or if
    /// it holds image records.
    pub fn open(dir: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let set = ShardSet::create(dir)?;
        let mut index = HashMap::new();
        let mut skipped = 0usize;

        for (_, path) in set.shard_paths()? {
            let mut reader = ShardReader::open(path)?;
            while let Some(next) = reader.next_located() {
                match next {
                    Ok((location, Record::Feature(vector))) => {
                        index.insert(vector.id().to_string(), location);
                    }
                    Ok((_, record)) => {
                        return Err(FeatureError::Dataset(DatasetError::validation(format!(
                            "{} holds {} record {}, not feature vectors",
                            set.dir().display(),
                            record.kind(),
                            record.id()
                        ))));
                    }
                    Err(err @ DatasetError::CorruptRecord { .. }) => {
                        warn!(path = %reader.path().display(), error = %err, "Skipping corrupt feature record");
                        skipped += 1;
                    }
                    Err(err @ DatasetError::TruncatedShard { .. }) => {
                        warn!(error = %err, "Ignoring truncated feature shard tail");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        info!(
            dir = %set.dir().display(),
            entries = index.len(),
            skipped,
            "Opened feature store"
        );

        Ok(Self {
            set,
            config,
            index: RwLock::new(index),
            pending: RwLock::new(HashMap::new()),
            writer: Mutex::new(None),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.set.dir()
    }

    fn contains(&self, id: &str) -> bool {
        self.pending.read().contains_key(id) || self.index.read().contains_key(id)
    }
}

impl FeatureStore for ShardedFeatureStore {
    fn get(&self, id: &str) -> Result<Option<FeatureVector>> {
        if let Some((_, vector)) = self.pending.read().get(id) {
            return Ok(Some(vector.clone()));
        }

        let Some(location) = self.index.read().get(id).copied() else {
            return Ok(None);
        };
        match self.set.read_at(location)? {
            Record::Feature(vector) if vector.id() == id => Ok(Some(vector)),
            record => Err(FeatureError::Dataset(DatasetError::corrupt_record(format!(
                "index entry for {id} points at {} record {}",
                record.kind(),
                record.id()
            )))),
        }
    }

    fn put(&self, vector: FeatureVector) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.contains(vector.id()) {
            return Err(FeatureError::AlreadyStored(vector.id().to_string()));
        }

        if writer.is_none() {
            *writer = Some(self.set.writer(STORE_NAME, self.config)?);
        }
        let Some(active) = writer.as_mut() else {
            return Err(FeatureError::Io("feature writer unavailable".to_string()));
        };

        let location = active.append(&Record::Feature(vector.clone()))?;
        self.pending
            .write()
            .insert(vector.id().to_string(), (location, vector));
        Ok(())
    }

    fn len(&self) -> usize {
        self.index.read().len() + self.pending.read().len()
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let Some(active) = writer.take() else {
            return Ok(());
        };
        active.finish()?;

        // Insert before removing so concurrent lookups never miss an entry
        let flushed: Vec<(String, RecordLocation)> = self
            .pending
            .read()
            .iter()
            .map(|(id, (location, _))| (id.clone(), *location))
            .collect();
        let count = flushed.len();
        self.index.write().extend(flushed);
        self.pending.write().clear();

        debug!(dir = %self.set.dir().display(), flushed = count, "Flushed feature store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ml_types::Label;

    use super::*;

    fn vector(id: &str, v: f32) -> FeatureVector {
        FeatureVector::new(id, vec![v, v + 1.0], Label::Class(0)).unwrap()
    }

    fn config() -> StoreConfig {
        StoreConfig::default().with_shard_size(256).without_sync()
    }

    #[test]
    fn memory_store_put_get() {
        let store = MemoryFeatureStore::new();
        assert!(store.is_empty());
        store.put(vector("a", 1.0)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vector("a", 1.0)));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_store_entries_are_final() {
        let store = MemoryFeatureStore::new();
        store.put(vector("a", 1.0)).unwrap();
        assert!(matches!(
            store.put(vector("a", 2.0)),
            Err(FeatureError::AlreadyStored(id)) if id == "a"
        ));
        assert_eq!(store.get("a").unwrap(), Some(vector("a", 1.0)));
    }

    #[test]
    fn sharded_store_serves_pending_then_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardedFeatureStore::open(dir.path(), config()).unwrap();

        store.put(vector("a", 1.0)).unwrap();
        store.put(vector("b", 2.0)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vector("a", 1.0)));

        store.flush().unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("b").unwrap(), Some(vector("b", 2.0)));
    }

    #[test]
    fn sharded_store_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ShardedFeatureStore::open(dir.path(), config()).unwrap();
            for i in 0..20 {
                store.put(vector(&format!("v{i}"), i as f32)).unwrap();
            }
            store.flush().unwrap();
        }

        let store = ShardedFeatureStore::open(dir.path(), config()).unwrap();
        assert_eq!(store.len(), 20);
        assert_eq!(store.get("v7").unwrap(), Some(vector("v7", 7.0)));
        assert!(matches!(
            store.put(vector("v7", 0.0)),
            Err(FeatureError::AlreadyStored(_))
        ));

        store.put(vector("v20", 20.0)).unwrap();
        store.flush().unwrap();
        assert_eq!(store.get("v20").unwrap(), Some(vector("v20", 20.0)));
    }

    #[test]
    fn sharded_store_rejects_image_shards() {
        use ml_dataset::ShardedStore;
        use ml_types::{Example, ImageShape, SplitName};

        let dir = tempfile::tempdir().unwrap();
        let images = ShardedStore::new(dir.path(), config()).unwrap();
        let ex = Example::new("i", ImageShape::new(1, 1, 1), vec![0], Label::Class(0)).unwrap();
        images
            .write(SplitName::Train, std::iter::once(Record::from(ex)))
            .unwrap();

        assert!(ShardedFeatureStore::open(images.split_dir(SplitName::Train), config()).is_err());
    }
}
