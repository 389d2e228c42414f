//! Pipeline and stream configuration.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Configuration shared by every stream of an [`InputPipeline`](crate::InputPipeline).
///
/// # Example
///
/// ```
/// use ml_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::default().with_workers(2).with_seed(42);
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.buffer_capacity, 256);
/// assert!(config.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of shard-reading worker threads.
    pub workers: usize,

    /// Maximum number of decoded records buffered between workers and the
    /// batch assembler. Workers block once it is reached.
    pub buffer_capacity: usize,

    /// Size of the sliding shuffle window used by shuffled streams.
    pub shuffle_window: usize,

    /// Seed for shard order and window shuffling (`None` = from entropy).
    pub seed: Option<u64>,

    /// Raise record-level errors instead of skipping them.
    pub strict: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            buffer_capacity: 256,
            shuffle_window: 1024,
            seed: None,
            strict: false,
        }
    }
}

impl PipelineConfig {
    /// Sets the number of workers.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the buffer capacity.
    #[must_use]
    pub const fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Sets the shuffle window size.
    #[must_use]
    pub const fn with_shuffle_window(mut self, window: usize) -> Self {
        self.shuffle_window = window;
        self
    }

    /// Sets the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enables strict mode.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Validates the configuration.
    ///
    /// Every worker needs at least one buffer slot, so the capacity must
    /// not be smaller than the worker count.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.workers > 0 && self.buffer_capacity >= self.workers
    }

    /// Returns an error if the configuration is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::invalid_config("workers must be > 0"));
        }
        if self.buffer_capacity < self.workers {
            return Err(PipelineError::invalid_config(format!(
                "buffer_capacity ({}) must be at least workers ({})",
                self.buffer_capacity, self.workers
            )));
        }
        Ok(())
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(PipelineError::from)
    }

    /// Deserializes and validates a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Saves the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// What a stream's batches carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Raw decoded images.
    #[default]
    Raw,

    /// Feature vectors, read from a feature split or resolved through the
    /// bottleneck cache.
    Feature,
}

impl PipelineMode {
    /// Returns the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Feature => "feature",
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "feature" | "features" | "bottleneck" => Ok(Self::Feature),
            other => Err(PipelineError::invalid_config(format!(
                "unknown pipeline mode: {other}"
            ))),
        }
    }
}

/// Per-stream options.
///
/// # Example
///
/// ```
/// use ml_pipeline::{PipelineMode, StreamOptions};
///
/// let options = StreamOptions::new(32)
///     .with_mode(PipelineMode::Feature)
///     .with_shuffle(true)
///     .drop_incomplete();
/// assert_eq!(options.num_epochs, Some(1));
/// assert!(options.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Records per batch.
    pub batch_size: usize,

    /// Payload mode.
    pub mode: PipelineMode,

    /// Shuffle shard order per epoch and records within the window.
    pub shuffle: bool,

    /// Drop a final batch smaller than `batch_size`.
    pub drop_incomplete: bool,

    /// Passes over the split; `None` repeats until the stream is closed.
    pub num_epochs: Option<usize>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::new(32)
    }
}

impl StreamOptions {
    /// Creates options for one unshuffled raw epoch.
    #[must_use]
    pub const fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            mode: PipelineMode::Raw,
            shuffle: false,
            drop_incomplete: false,
            num_epochs: Some(1),
        }
    }

    /// Sets the mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables or disables shuffling.
    #[must_use]
    pub const fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Drops a final undersized batch.
    #[must_use]
    pub const fn drop_incomplete(mut self) -> Self {
        self.drop_incomplete = true;
        self
    }

    /// Sets the number of epochs.
    #[must_use]
    pub const fn with_epochs(mut self, epochs: usize) -> Self {
        self.num_epochs = Some(epochs);
        self
    }

    /// Repeats the split until the stream is closed.
    #[must_use]
    pub const fn repeat(mut self) -> Self {
        self.num_epochs = None;
        self
    }

    /// Validates the options.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.batch_size > 0 && !matches!(self.num_epochs, Some(0))
    }

    /// Returns an error if the options are invalid.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero batch size or
    /// zero epochs.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_config("batch_size must be > 0"));
        }
        if self.num_epochs == Some(0) {
            return Err(PipelineError::invalid_config("num_epochs must be > 0"));
        }
        Ok(())
    }
}
