//! Feeding batches to a model collaborator.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::Batch;
use crate::error::Result;
use crate::stream::BatchStream;

/// A one-directional sink for batches, such as a training step.
///
/// `begin` acquires whatever the consumer needs (a device, a model
/// checkpoint), `consume` is called once per batch and `finish` releases
/// everything. [`feed`] calls `finish` even when an earlier step failed.
pub trait BatchConsumer {
    /// Called once before the first batch.
    ///
    /// # Errors
    ///
    /// An error aborts the feed before any batch is read.
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Consumes one batch.
    ///
    /// # Errors
    ///
    /// An error stops the feed.
    fn consume(&mut self, batch: Batch) -> Result<()>;

    /// Called once after the last batch, also after a failure.
    ///
    /// # Errors
    ///
    /// Reported when nothing else failed.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> BatchConsumer for F
where
    F: FnMut(Batch) -> Result<()>,
{
    fn consume(&mut self, batch: Batch) -> Result<()> {
        self(batch)
    }
}

/// Totals of one [`feed`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReport {
    /// Batches consumed.
    pub batches: usize,

    /// Records consumed.
    pub records: usize,
}

/// Drives `consumer` with batches from `stream`.
///
/// Stops at the end of the stream or after `max_batches`. The consumer is
/// always finished and the stream always closed, so no worker outlives the
/// call.
///
/// # Errors
///
/// Returns the first error from the consumer, the stream, `finish` or
/// closing the stream, in that order of precedence.
pub fn feed<C>(
    mut stream: BatchStream,
    consumer: &mut C,
    max_batches: Option<usize>,
) -> Result<FeedReport>
where
    C: BatchConsumer + ?Sized,
{
    let mut report = FeedReport::default();
    let outcome = consumer.begin().and_then(|()| {
        while max_batches.is_none_or(|max| report.batches < max) {
            let Some(batch) = stream.next_batch()? else {
                break;
            };
            report.records += batch.len();
            consumer.consume(batch)?;
            report.batches += 1;
        }
        Ok(())
    });

    let finished = consumer.finish();
    let closed = stream.close();
    if let Err(err) = &outcome {
        warn!(split = %stream.split(), error = %err, "Feed stopped early");
    }
    outcome.and(finished).and(closed)?;

    info!(
        split = %stream.split(),
        batches = report.batches,
        records = report.records,
        "Feed finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ml_dataset::{ShardedStore, StoreConfig};
    use ml_types::{Example, ImageShape, Label, Record, SplitName};

    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::PipelineError;
    use crate::pipeline::InputPipeline;

    #[derive(Default)]
    struct Recorder {
        began: bool,
        finished: bool,
        seen: Vec<usize>,
        fail_at: Option<usize>,
    }

    impl BatchConsumer for Recorder {
        fn begin(&mut self) -> Result<()> {
            self.began = true;
            Ok(())
        }

        fn consume(&mut self, batch: Batch) -> Result<()> {
            if self.fail_at == Some(batch.index) {
                return Err(PipelineError::consumer("step diverged"));
            }
            self.seen.push(batch.len());
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn pipeline(dir: &std::path::Path, n: usize) -> InputPipeline {
        let store = ShardedStore::new(dir, StoreConfig::default()).unwrap();
        let records = (0..n).map(|i| {
            Record::from(
                Example::new(format!("img{i}"), ImageShape::new(1, 1, 1), vec![0], Label::Class(1))
                    .unwrap(),
            )
        });
        store.write(SplitName::Train, records).unwrap();
        InputPipeline::new(Arc::new(store), PipelineConfig::default()).unwrap()
    }

    fn open(pipeline: &InputPipeline) -> BatchStream {
        pipeline
            .open(SplitName::Train, 4, crate::PipelineMode::Raw, false)
            .unwrap()
    }

    #[test]
    fn feed_runs_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), 10);
        let mut recorder = Recorder::default();

        let report = feed(open(&pipeline), &mut recorder, None).unwrap();
        assert_eq!(report, FeedReport { batches: 3, records: 10 });
        assert!(recorder.began && recorder.finished);
        assert_eq!(recorder.seen, vec![4, 4, 2]);
    }

    #[test]
    fn feed_honors_max_batches() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), 10);
        let mut count = 0;
        let mut step = |_batch: Batch| {
            count += 1;
            Ok::<(), PipelineError>(())
        };

        let report = feed(open(&pipeline), &mut step, Some(2)).unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(count, 2);
    }

    #[test]
    fn feed_finishes_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), 10);
        let mut recorder = Recorder {
            fail_at: Some(1),
            ..Recorder::default()
        };

        let result = feed(open(&pipeline), &mut recorder, None);
        assert!(matches!(result, Err(PipelineError::Consumer(_))));
        assert!(recorder.finished);
        assert_eq!(recorder.seen, vec![4]);
    }
}
