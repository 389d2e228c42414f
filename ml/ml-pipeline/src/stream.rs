//! Batch assembly on the consuming thread.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Select};
use ml_types::{Record, SplitName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchItem, BatchShape};
use crate::config::StreamOptions;
use crate::error::{PipelineError, Result};
use crate::shuffle::ShuffleWindow;
use crate::worker::{Message, WorkerPool};

/// Counters of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Records delivered in batches.
    pub records: usize,

    /// Batches delivered.
    pub batches: usize,

    /// Records skipped because they could not be decoded.
    pub skipped_corrupt: usize,

    /// Records skipped because feature extraction failed.
    pub skipped_extraction: usize,

    /// Records skipped because their shape differed from the stream's.
    pub skipped_mismatch: usize,

    /// Highest number of records seen waiting in the worker buffer.
    pub peak_buffered: usize,

    /// Shard reads completed by workers.
    pub shards_completed: usize,
}

impl StreamStats {
    /// Returns the total number of skipped records.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_corrupt + self.skipped_extraction + self.skipped_mismatch
    }
}

/// A lazy sequence of batches from one split.
///
/// Opened by [`InputPipeline::open`](crate::InputPipeline::open). Background
/// workers read shards into a bounded buffer while this value, on the
/// consuming thread, drains the buffer, optionally shuffles within a
/// sliding window and groups records into batches.
///
/// Unshuffled streams deliver records in shard-then-offset order.
/// Record-level errors are counted and skipped unless the pipeline is
/// strict. A store-level error (such as a truncated shard) ends the stream:
/// records read before it are still delivered, then the error is returned
/// once.
///
/// Dropping the stream closes it.
pub struct BatchStream {
    split: SplitName,
    options: StreamOptions,
    strict: bool,

    receivers: Vec<Receiver<Message>>,
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    total_tasks: Option<usize>,
    next_task: usize,

    window: Option<ShuffleWindow<BatchItem>>,
    ready: VecDeque<BatchItem>,
    shape: Option<BatchShape>,

    pending_error: Option<PipelineError>,
    exhausted: bool,
    closed: bool,
    stats: StreamStats,
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("split", &self.split)
            .field("options", &self.options)
            .field("active_workers", &self.active_workers())
            .field("exhausted", &self.exhausted)
            .field("closed", &self.closed)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Construction parameters for [`BatchStream`].
pub(crate) struct StreamParts {
    pub(crate) split: SplitName,
    pub(crate) options: StreamOptions,
    pub(crate) strict: bool,
    pub(crate) pool: WorkerPool,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) total_tasks: Option<usize>,
    pub(crate) window: Option<ShuffleWindow<BatchItem>>,
}

impl BatchStream {
    pub(crate) fn new(parts: StreamParts) -> Self {
        let exhausted = parts.pool.receivers.is_empty();
        Self {
            split: parts.split,
            options: parts.options,
            strict: parts.strict,
            receivers: parts.pool.receivers,
            handles: parts.pool.handles,
            stop: parts.stop,
            active: parts.active,
            total_tasks: parts.total_tasks,
            next_task: 0,
            window: parts.window,
            ready: VecDeque::new(),
            shape: None,
            pending_error: None,
            exhausted,
            closed: false,
            stats: StreamStats::default(),
        }
    }

    /// Returns the split being read.
    #[must_use]
    pub const fn split(&self) -> SplitName {
        self.split
    }

    /// Returns the stream options.
    #[must_use]
    pub const fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Returns the stream counters.
    #[must_use]
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Returns the payload shape fixed by the first record, once known.
    #[must_use]
    pub const fn shape(&self) -> Option<BatchShape> {
        self.shape
    }

    /// Returns the number of worker threads still running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the next batch, or `None` at the end of the stream.
    ///
    /// Blocks while the buffer is empty and workers are still reading.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Closed`] after [`close`](Self::close)
    /// - a record-level error in strict mode
    /// - the store-level error that ended the stream, or
    ///   [`PipelineError::WorkerPanicked`]
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.closed {
            return Err(PipelineError::Closed);
        }

        let batch_size = self.options.batch_size;
        loop {
            if self.ready.len() >= batch_size {
                return Ok(Some(self.take_batch(batch_size)));
            }

            if self.exhausted {
                if !self.ready.is_empty() && !self.options.drop_incomplete {
                    let n = self.ready.len();
                    return Ok(Some(self.take_batch(n)));
                }
                self.ready.clear();
                return match self.pending_error.take() {
                    Some(err) => Err(err),
                    None => Ok(None),
                };
            }

            self.pump();
        }
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// Workers stop between records, so no record is half-read. Buffered
    /// records are discarded and later calls to
    /// [`next_batch`](Self::next_batch) fail with
    /// [`PipelineError::Closed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerPanicked`] if a worker panicked.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.exhausted = true;
        self.ready.clear();
        if let Some(window) = self.window.as_mut() {
            window.clear();
        }

        let panicked = self.shutdown_workers();
        info!(
            split = %self.split,
            batches = self.stats.batches,
            records = self.stats.records,
            skipped = self.stats.skipped(),
            "Batch stream closed"
        );

        if panicked > 0 {
            return Err(PipelineError::WorkerPanicked(panicked));
        }
        Ok(())
    }

    fn take_batch(&mut self, n: usize) -> Batch {
        let items: Vec<BatchItem> = self.ready.drain(..n).collect();
        let batch = Batch {
            split: self.split,
            index: self.stats.batches,
            shape: self.shape.unwrap_or(BatchShape::Features(0)),
            items,
        };
        self.stats.batches += 1;
        self.stats.records += batch.len();
        batch
    }

    /// Moves one message from the workers into the assembly buffers.
    fn pump(&mut self) {
        match self.receive() {
            Some(Message::Record(record)) => self.accept(record),
            Some(Message::Fault(err)) => self.fault(err),
            Some(Message::ShardEnd) => {
                self.stats.shards_completed += 1;
                self.next_task += 1;
            }
            Some(Message::Fatal(err)) => {
                warn!(split = %self.split, error = %err, "Stream ended by error");
                self.pending_error = Some(err);
                self.finish_input();
            }
            None => self.finish_input(),
        }
    }

    fn receive(&mut self) -> Option<Message> {
        let buffered: usize = self.receivers.iter().map(Receiver::len).sum();
        self.stats.peak_buffered = self.stats.peak_buffered.max(buffered);

        if self.options.shuffle {
            return self.receive_any();
        }

        if self
            .total_tasks
            .is_some_and(|total| self.next_task >= total)
        {
            return None;
        }
        let n = self.receivers.len();
        if n == 0 {
            return None;
        }
        self.receivers[self.next_task % n].recv().ok()
    }

    /// Receives from whichever worker is ready first.
    fn receive_any(&mut self) -> Option<Message> {
        while !self.receivers.is_empty() {
            let mut select = Select::new();
            for rx in &self.receivers {
                select.recv(rx);
            }
            let op = select.select();
            let index = op.index();
            match op.recv(&self.receivers[index]) {
                Ok(message) => return Some(message),
                Err(_) => {
                    self.receivers.swap_remove(index);
                }
            }
        }
        None
    }

    fn accept(&mut self, record: Record) {
        let shape = BatchShape::of(&record);
        match self.shape {
            None => self.shape = Some(shape),
            Some(expected) if expected != shape => {
                let reason = format!("expected {expected}, got {shape}");
                self.fault(PipelineError::record_mismatch(record.id(), reason));
                return;
            }
            Some(_) => {}
        }

        let item = BatchItem::from(record);
        match self.window.as_mut() {
            Some(window) => {
                if let Some(out) = window.push(item) {
                    self.ready.push_back(out);
                }
            }
            None => self.ready.push_back(item),
        }
    }

    fn fault(&mut self, err: PipelineError) {
        match &err {
            PipelineError::Feature(_) => self.stats.skipped_extraction += 1,
            PipelineError::RecordMismatch { .. } => self.stats.skipped_mismatch += 1,
            _ => self.stats.skipped_corrupt += 1,
        }

        if self.strict {
            self.pending_error = Some(err);
            self.finish_input();
        } else {
            warn!(split = %self.split, error = %err, "Skipping record");
        }
    }

    /// Ends input: stops the workers and releases the shuffle window.
    fn finish_input(&mut self) {
        self.exhausted = true;
        let panicked = self.shutdown_workers();
        if panicked > 0 && self.pending_error.is_none() {
            self.pending_error = Some(PipelineError::WorkerPanicked(panicked));
        }
        if let Some(window) = self.window.as_mut() {
            self.ready.extend(window.drain());
        }
        debug!(
            split = %self.split,
            shards = self.stats.shards_completed,
            "Batch stream input finished"
        );
    }

    /// Signals, disconnects and joins every worker. Returns how many panicked.
    fn shutdown_workers(&mut self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the receivers wakes workers blocked on a full channel
        self.receivers.clear();
        self.handles
            .drain(..)
            .map(JoinHandle::join)
            .filter(std::result::Result::is_err)
            .count()
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        self.next_batch().transpose()
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(split = %self.split, error = %err, "Batch stream closed with error");
        }
    }
}
