//! Shard-reading worker pool.
//!
//! Every pass over a split is cut into tasks, one per shard and epoch.
//! Task `j` reads shard `j % S` of epoch `j / S`, and worker `k` of `N`
//! owns tasks `k, k + N, k + 2N, ...`. Each worker pushes decoded records
//! into its own bounded channel, so an ordered reader can follow the task
//! sequence by visiting the channels round-robin.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use ml_dataset::{ShardReader, permute_shards};
use ml_features::BottleneckCache;
use ml_types::Record;
use tracing::debug;

use crate::config::PipelineMode;
use crate::error::{PipelineError, Result};

/// What a worker sends to the assembler.
#[derive(Debug)]
pub(crate) enum Message {
    /// A decoded, mode-resolved record.
    Record(Record),

    /// A record-level error; the worker carries on.
    Fault(PipelineError),

    /// The worker finished the current task's shard.
    ShardEnd,

    /// An error that ends the worker.
    Fatal(PipelineError),
}

/// The shard sequence a stream reads.
#[derive(Debug, Clone)]
pub(crate) struct TaskPlan {
    shards: Vec<PathBuf>,
    shuffle_seed: Option<u64>,
    epochs: Option<usize>,
}

impl TaskPlan {
    /// Creates a plan over `shards` in file-name order.
    ///
    /// With a shuffle seed, epoch `e` reads a permutation seeded with
    /// `seed + e`.
    pub(crate) const fn new(
        shards: Vec<PathBuf>,
        shuffle_seed: Option<u64>,
        epochs: Option<usize>,
    ) -> Self {
        Self {
            shards,
            shuffle_seed,
            epochs,
        }
    }

    /// Returns the number of tasks, or `None` for an endless plan.
    pub(crate) fn total_tasks(&self) -> Option<usize> {
        if self.shards.is_empty() {
            return Some(0);
        }
        self.epochs.map(|epochs| epochs * self.shards.len())
    }

    /// Returns the shard order of one epoch.
    pub(crate) fn epoch_order(&self, epoch: usize) -> Vec<PathBuf> {
        let mut order = self.shards.clone();
        if let Some(seed) = self.shuffle_seed {
            permute_shards(&mut order, seed.wrapping_add(epoch as u64));
        }
        order
    }

    fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Everything a worker thread needs.
struct Worker {
    index: usize,
    workers: usize,
    plan: Arc<TaskPlan>,
    mode: PipelineMode,
    cache: Option<Arc<BottleneckCache>>,
    stop: Arc<AtomicBool>,
    tx: Sender<Message>,
}

/// Decrements the live-worker count when a worker exits, panics included.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker {
    fn run(self) {
        debug!(worker = self.index, "Pipeline worker started");
        let total = self.plan.total_tasks();
        let shards = self.plan.shard_count();
        let mut order: Option<(usize, Vec<PathBuf>)> = None;
        let mut task = self.index;

        while total.is_none_or(|total| task < total) && !self.stopped() {
            let epoch = task / shards;
            if order.as_ref().is_none_or(|(e, _)| *e != epoch) {
                order = Some((epoch, self.plan.epoch_order(epoch)));
            }
            let Some(path) = order.as_ref().map(|(_, paths)| paths[task % shards].clone()) else {
                break;
            };

            if !self.read_shard(&path) {
                break;
            }
            task += self.workers;
        }
        debug!(worker = self.index, "Pipeline worker stopped");
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Streams one shard. Returns `false` when the worker must exit.
    fn read_shard(&self, path: &Path) -> bool {
        let reader = match ShardReader::open(path) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = self.tx.send(Message::Fatal(err.into()));
                return false;
            }
        };

        for next in reader {
            // Stop only between records
            if self.stopped() {
                return false;
            }

            let message = match next {
                Ok(record) => self.resolve(record),
                Err(err) if err.is_record_level() => Message::Fault(err.into()),
                Err(err) => Message::Fatal(err.into()),
            };
            let fatal = matches!(message, Message::Fatal(_));
            if self.tx.send(message).is_err() || fatal {
                return false;
            }
        }

        self.tx.send(Message::ShardEnd).is_ok()
    }

    /// Resolves image records through the cache in feature mode.
    fn resolve(&self, record: Record) -> Message {
        let (PipelineMode::Feature, Some(cache), Record::Image(example)) =
            (self.mode, &self.cache, &record)
        else {
            return Message::Record(record);
        };

        match cache.get_or_compute(example) {
            Ok(vector) => Message::Record(Record::Feature(vector)),
            Err(err) if err.is_extraction_failure() => Message::Fault(err.into()),
            Err(err) => Message::Fatal(err.into()),
        }
    }
}

/// Handles to a running worker pool.
pub(crate) struct WorkerPool {
    pub(crate) receivers: Vec<Receiver<Message>>,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

/// Shared settings for [`spawn_workers`].
pub(crate) struct PoolSettings {
    pub(crate) workers: usize,
    pub(crate) buffer_capacity: usize,
    pub(crate) mode: PipelineMode,
    pub(crate) cache: Option<Arc<BottleneckCache>>,
}

/// Starts up to `settings.workers` threads over `plan`.
///
/// The buffer capacity is divided evenly between the per-worker channels,
/// so the records buffered across all of them never exceed it. No thread
/// is started for a plan without tasks.
///
/// # Errors
///
/// Returns an error if a thread cannot be spawned; threads already started
/// are stopped by the caller dropping the returned receivers.
pub(crate) fn spawn_workers(
    plan: &Arc<TaskPlan>,
    settings: &PoolSettings,
    stop: &Arc<AtomicBool>,
    active: &Arc<AtomicUsize>,
) -> Result<WorkerPool> {
    let tasks = plan.total_tasks().unwrap_or(usize::MAX);
    let workers = settings.workers.min(tasks);
    let mut pool = WorkerPool {
        receivers: Vec::with_capacity(workers),
        handles: Vec::with_capacity(workers),
    };
    if workers == 0 {
        return Ok(pool);
    }
    let per_worker = (settings.buffer_capacity / workers).max(1);

    for index in 0..workers {
        let (tx, rx) = bounded(per_worker);
        let worker = Worker {
            index,
            workers,
            plan: Arc::clone(plan),
            mode: settings.mode,
            cache: settings.cache.clone(),
            stop: Arc::clone(stop),
            tx,
        };

        active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(active));
        let spawned = std::thread::Builder::new()
            .name(format!("pipeline-worker-{index}"))
            .spawn(move || {
                let _guard = guard;
                worker.run();
            });

        match spawned {
            Ok(handle) => {
                pool.receivers.push(rx);
                pool.handles.push(handle);
            }
            Err(err) => {
                // The closure (and its guard) was dropped with the error
                stop.store(true, Ordering::SeqCst);
                return Err(PipelineError::from(err));
            }
        }
    }

    Ok(pool)
}
