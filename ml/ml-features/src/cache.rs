//! Bottleneck cache with at-most-once extraction.
//!
//! The cache sits between raw examples and the feature-extractor
//! collaborator. Lookups hit the injected [`FeatureStore`] first; a miss
//! elects one caller as leader for that identifier, which runs the
//! extractor and stores the result while concurrent callers for the same
//! identifier wait for its outcome.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ml_dataset::DEFAULT_SHARD_SIZE_BYTES;
use ml_types::{Example, FeatureVector};
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FeatureError, Result};
use crate::extractor::FeatureExtractor;
use crate::store::FeatureStore;

/// Bottleneck size of the Inception-v3 penultimate layer.
pub const DEFAULT_FEATURE_DIM: usize = 2048;

/// Configuration for a [`BottleneckCache`].
///
/// # Example
///
/// ```
/// use ml_features::CacheConfig;
///
/// let config = CacheConfig::default().with_feature_dim(128);
/// assert_eq!(config.feature_dim, 128);
/// assert!(config.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expected length of every feature vector.
    pub feature_dim: usize,

    /// Shard rotation threshold of a persisted cache.
    pub shard_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            feature_dim: DEFAULT_FEATURE_DIM,
            shard_size_bytes: DEFAULT_SHARD_SIZE_BYTES,
        }
    }
}

impl CacheConfig {
    /// Sets the feature dimension.
    #[must_use]
    pub const fn with_feature_dim(mut self, feature_dim: usize) -> Self {
        self.feature_dim = feature_dim;
        self
    }

    /// Sets the shard rotation threshold.
    #[must_use]
    pub const fn with_shard_size(mut self, bytes: u64) -> Self {
        self.shard_size_bytes = bytes;
        self
    }

    /// Validates the configuration.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.feature_dim > 0 && self.shard_size_bytes > 0
    }

    /// Returns the storage configuration for a persisted cache.
    #[must_use]
    pub fn store_config(&self) -> ml_dataset::StoreConfig {
        ml_dataset::StoreConfig::default().with_shard_size(self.shard_size_bytes)
    }

    /// Deserializes a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the configuration invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if !config.is_valid() {
            return Err(FeatureError::invalid_config(
                "feature_dim and shard_size_bytes must be > 0",
            ));
        }
        Ok(config)
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(FeatureError::from)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

/// Counters of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered from the store.
    pub hits: u64,

    /// Vectors computed by the extractor and stored.
    pub computed: u64,

    /// Extractions that failed.
    pub failures: u64,

    /// Callers that waited on another caller's extraction.
    pub waits: u64,
}

/// How a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Found in the store.
    Cached,

    /// Computed by this caller.
    Computed,

    /// Computed by a concurrent caller this one waited for.
    Shared,
}

/// Outcome of [`BottleneckCache::populate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulateReport {
    /// Examples requested.
    pub requested: usize,

    /// Examples already cached.
    pub cached: usize,

    /// Examples computed during this run.
    pub computed: usize,

    /// Identifiers whose extraction failed, with the reason.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<(String, String)>,
}

impl PopulateReport {
    /// Returns true if every example now has a cached vector.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum SlotState {
    Pending,
    Done(Result<FeatureVector>),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Result<FeatureVector>) {
        *self.state.lock() = SlotState::Done(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<FeatureVector> {
        let mut state = self.state.lock();
        loop {
            if let SlotState::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.ready.wait(&mut state);
        }
    }
}

/// Publishes the leader's outcome and retires its slot, also on panic.
struct Leader<'a> {
    in_flight: &'a Mutex<HashMap<String, Arc<Slot>>>,
    id: &'a str,
    slot: Arc<Slot>,
    outcome: Option<Result<FeatureVector>>,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(FeatureError::extraction(self.id, "extractor panicked")));
        self.slot.publish(outcome);
        self.in_flight.lock().remove(self.id);
    }
}

/// Feature cache keyed by example identifier.
///
/// Open it at the start of a run with [`BottleneckCache::open`] and close it
/// at the end with [`BottleneckCache::close`], which flushes the store.
/// The cache is `Sync`; share it across threads with an `Arc`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use ml_features::{BottleneckCache, CacheConfig, FnExtractor, MemoryFeatureStore};
/// use ml_types::{Example, ImageShape, Label};
///
/// let extractor = FnExtractor::new(2, |ex: &Example| Ok(vec![1.0, f32::from(ex.pixels()[0])]));
/// let cache = BottleneckCache::open(
///     Arc::new(MemoryFeatureStore::new()),
///     Arc::new(extractor),
///     CacheConfig::default().with_feature_dim(2),
/// )
/// .unwrap();
///
/// let ex = Example::new("a", ImageShape::new(1, 1, 1), vec![9], Label::Class(1)).unwrap();
/// let first = cache.get_or_compute(&ex).unwrap();
/// let second = cache.get_or_compute(&ex).unwrap();
/// assert_eq!(first, second);
///
/// let stats = cache.close().unwrap();
/// assert_eq!(stats.computed, 1);
/// assert_eq!(stats.hits, 1);
/// ```
pub struct BottleneckCache {
    store: Arc<dyn FeatureStore>,
    extractor: Arc<dyn FeatureExtractor>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<String, Arc<Slot>>>,
    hits: AtomicU64,
    computed: AtomicU64,
    failures: AtomicU64,
    waits: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for BottleneckCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BottleneckCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl BottleneckCache {
    /// Opens a cache over a store and an extractor.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidConfig`] if the configuration is
    /// invalid or disagrees with the extractor's dimension.
    pub fn open(
        store: Arc<dyn FeatureStore>,
        extractor: Arc<dyn FeatureExtractor>,
        config: CacheConfig,
    ) -> Result<Self> {
        if !config.is_valid() {
            return Err(FeatureError::invalid_config(
                "feature_dim and shard_size_bytes must be > 0",
            ));
        }
        if extractor.feature_dim() != config.feature_dim {
            return Err(FeatureError::invalid_config(format!(
                "extractor produces {} values, cache expects {}",
                extractor.feature_dim(),
                config.feature_dim
            )));
        }

        info!(
            feature_dim = config.feature_dim,
            entries = store.len(),
            "Opened bottleneck cache"
        );

        Ok(Self {
            store,
            extractor,
            config,
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            computed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the feature dimension.
    #[must_use]
    pub const fn feature_dim(&self) -> usize {
        self.config.feature_dim
    }

    /// Returns the number of cached vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computed: self.computed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
        }
    }

    /// Looks up a cached vector without computing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is closed or the store cannot be read.
    pub fn get(&self, id: &str) -> Result<Option<FeatureVector>> {
        self.ensure_open()?;
        self.store.get(id)
    }

    /// Returns the feature vector of `example`, computing and storing it on
    /// a miss.
    ///
    /// Concurrent calls for the same uncached identifier run the extractor
    /// once; the others block until it finishes and receive the same
    /// vector, or the same failure.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::Extraction`] or
    /// [`FeatureError::DimensionMismatch`] if extraction fails (nothing is
    /// stored, a later call retries), [`FeatureError::Closed`] after
    /// [`close`](Self::close), or a storage error.
    pub fn get_or_compute(&self, example: &Example) -> Result<FeatureVector> {
        self.resolve(example).map(|(vector, _)| vector)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting how
    /// the lookup was answered.
    ///
    /// # Errors
    ///
    /// See [`get_or_compute`](Self::get_or_compute).
    pub fn resolve(&self, example: &Example) -> Result<(FeatureVector, Resolution)> {
        self.ensure_open()?;
        let id = example.id();

        if let Some(vector) = self.store.get(id)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(id, "Bottleneck cache hit");
            return Ok((vector, Resolution::Cached));
        }

        let (slot, leader) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(id) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    in_flight.insert(id.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            self.waits.fetch_add(1, Ordering::Relaxed);
            debug!(id, "Waiting for in-flight extraction");
            return slot.wait().map(|vector| (vector, Resolution::Shared));
        }

        let mut guard = Leader {
            in_flight: &self.in_flight,
            id,
            slot,
            outcome: None,
        };
        let result = self.compute(example);
        guard.outcome = Some(result.clone().map(|(vector, _)| vector));
        drop(guard);
        result
    }

    fn compute(&self, example: &Example) -> Result<(FeatureVector, Resolution)> {
        let id = example.id();

        // A previous leader may have stored the vector since our lookup
        if let Some(vector) = self.store.get(id)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((vector, Resolution::Cached));
        }

        let vector = self
            .extractor
            .extract(example)
            .and_then(|values| {
                if values.len() == self.config.feature_dim {
                    FeatureVector::new(id, values, example.label())
                        .map_err(|e| FeatureError::extraction(id, e.to_string()))
                } else {
                    Err(FeatureError::dimension_mismatch(
                        id,
                        self.config.feature_dim,
                        values.len(),
                    ))
                }
            })
            .inspect_err(|err| {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(id, error = %err, "Feature extraction failed");
            })?;

        self.store.put(vector.clone())?;
        self.computed.fetch_add(1, Ordering::Relaxed);
        debug!(id, "Computed bottleneck");
        Ok((vector, Resolution::Computed))
    }

    /// Computes every missing vector in parallel: the cache-population run.
    ///
    /// Failures are collected rather than aborting the run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache is closed or storage fails.
    pub fn populate(&self, examples: &[Example]) -> Result<PopulateReport> {
        self.ensure_open()?;

        let outcomes: Vec<(String, Result<Resolution>)> = examples
            .par_iter()
            .map(|example| {
                let outcome = self.resolve(example).map(|(_, resolution)| resolution);
                (example.id().to_string(), outcome)
            })
            .collect();

        let mut report = PopulateReport {
            requested: examples.len(),
            ..PopulateReport::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Resolution::Cached | Resolution::Shared) => report.cached += 1,
                Ok(Resolution::Computed) => report.computed += 1,
                Err(err) if err.is_extraction_failure() => {
                    report.failed.push((id, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            requested = report.requested,
            cached = report.cached,
            computed = report.computed,
            failed = report.failed.len(),
            "Populated bottleneck cache"
        );
        Ok(report)
    }

    /// Flushes the store without closing the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Closes the cache: flushes the store and rejects later lookups.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be flushed.
    pub fn close(&self) -> Result<CacheStats> {
        self.closed.store(true, Ordering::Release);
        self.store.flush()?;
        let stats = self.stats();
        info!(
            hits = stats.hits,
            computed = stats.computed,
            failures = stats.failures,
            waits = stats.waits,
            "Closed bottleneck cache"
        );
        Ok(stats)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(FeatureError::Closed)
        } else {
            Ok(())
        }
    }
}
