//! Averaging a metric over an evaluation stream.

use tracing::debug;

use crate::batch::Batch;
use crate::error::{PipelineError, Result};
use crate::stream::BatchStream;

/// Evaluates `metric` on `ceil(num_examples / batch_size)` batches and
/// returns the mean of the per-batch values.
///
/// Use an endless stream ([`StreamOptions::repeat`](crate::StreamOptions::repeat))
/// when `num_examples` is not a multiple of the batch size, so the last
/// step wraps into the next epoch instead of running dry. The stream is
/// closed before returning.
///
/// # Errors
///
/// Returns an error if `num_examples` is zero, the stream yields no batch,
/// or the metric or stream fails.
pub fn average_over_batches<F>(
    mut stream: BatchStream,
    num_examples: usize,
    mut metric: F,
) -> Result<f64>
where
    F: FnMut(&Batch) -> Result<f64>,
{
    if num_examples == 0 {
        return Err(PipelineError::invalid_config("num_examples must be > 0"));
    }
    let steps = num_examples.div_ceil(stream.options().batch_size);

    let mut total = 0.0;
    let mut evaluated = 0usize;
    for _ in 0..steps {
        let Some(batch) = stream.next_batch()? else {
            break;
        };
        total += metric(&batch)?;
        evaluated += 1;
    }
    stream.close()?;

    if evaluated == 0 {
        return Err(PipelineError::invalid_config(format!(
            "split {} produced no batches to evaluate",
            stream.split()
        )));
    }
    debug!(steps, evaluated, "Averaged metric over batches");

    #[allow(clippy::cast_precision_loss)]
    let mean = total / evaluated as f64;
    Ok(mean)
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use ml_dataset::{ShardedStore, StoreConfig};
    use ml_types::{Example, ImageShape, Label, Record, SplitName};

    use super::*;
    use crate::config::{PipelineConfig, StreamOptions};
    use crate::pipeline::InputPipeline;

    fn pipeline(dir: &std::path::Path) -> InputPipeline {
        let store = ShardedStore::new(dir, StoreConfig::default()).unwrap();
        let records = (0u8..10).map(|i| {
            Record::from(
                Example::new(format!("img{i}"), ImageShape::new(1, 1, 1), vec![i], Label::Class(0))
                    .unwrap(),
            )
        });
        store.write(SplitName::Validation, records).unwrap();
        InputPipeline::new(Arc::new(store), PipelineConfig::default().with_workers(1)).unwrap()
    }

    #[test]
    fn average_covers_ceil_steps() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let stream = pipeline
            .open_with(SplitName::Validation, StreamOptions::new(4).repeat())
            .unwrap();

        let mut calls = 0;
        let mean = average_over_batches(stream, 10, |batch| {
            calls += 1;
            Ok(batch.len() as f64)
        })
        .unwrap();

        // 10 examples at 4 per batch: three full batches from the endless stream
        assert_eq!(calls, 3);
        assert_relative_eq!(mean, 4.0);
    }

    #[test]
    fn average_single_epoch_uses_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let stream = pipeline
            .open_with(SplitName::Validation, StreamOptions::new(4))
            .unwrap();

        let mean = average_over_batches(stream, 10, |batch| Ok(batch.len() as f64)).unwrap();
        assert_relative_eq!(mean, 10.0 / 3.0);
    }

    #[test]
    fn average_rejects_zero_examples() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let stream = pipeline
            .open_with(SplitName::Validation, StreamOptions::new(4))
            .unwrap();
        assert!(average_over_batches(stream, 0, |_| Ok(1.0)).is_err());
    }
}
