//! CSV export of per-example predictions.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::batch::Batch;
use crate::consumer::{BatchConsumer, feed};
use crate::error::{PipelineError, Result};
use crate::stream::BatchStream;

/// Writes `id,label` rows, one per example, with the predicted probability
/// rounded to two decimals.
///
/// # Example
///
/// ```
/// use ml_pipeline::PredictionWriter;
///
/// let mut writer = PredictionWriter::new(Vec::new()).unwrap();
/// writer.write_row("17", 0.876).unwrap();
/// let out = writer.finish().unwrap();
/// assert_eq!(String::from_utf8(out).unwrap(), "id,label\n17,0.88\n");
/// ```
#[derive(Debug)]
pub struct PredictionWriter<W: Write> {
    out: W,
    rows: usize,
}

impl PredictionWriter<BufWriter<File>> {
    /// Creates (or truncates) a prediction file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> PredictionWriter<W> {
    /// Wraps a writer and emits the header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(b"id,label\n")?;
        Ok(Self { out, rows: 0 })
    }

    /// Writes one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_row(&mut self, id: &str, probability: f32) -> Result<()> {
        writeln!(self.out, "{},{probability:.2}", csv_field(id))?;
        self.rows += 1;
        Ok(())
    }

    /// Writes one row per batch item.
    ///
    /// # Errors
    ///
    /// Returns an error if `probabilities` does not match the batch length
    /// or a write fails.
    pub fn write_batch(&mut self, batch: &Batch, probabilities: &[f32]) -> Result<()> {
        if probabilities.len() != batch.len() {
            return Err(PipelineError::consumer(format!(
                "batch {} has {} items but {} predictions",
                batch.index,
                batch.len(),
                probabilities.len()
            )));
        }
        for (item, &p) in batch.items.iter().zip(probabilities) {
            self.write_row(&item.id, p)?;
        }
        Ok(())
    }

    /// Returns the number of rows written.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes and returns the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Feeds batches through a prediction function into a writer.
struct PredictionSink<W: Write, F> {
    writer: PredictionWriter<W>,
    predict: F,
}

impl<W, F> BatchConsumer for PredictionSink<W, F>
where
    W: Write,
    F: FnMut(&Batch) -> Result<Vec<f32>>,
{
    fn consume(&mut self, batch: Batch) -> Result<()> {
        let probabilities = (self.predict)(&batch)?;
        self.writer.write_batch(&batch, &probabilities)
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.out.flush()?;
        Ok(())
    }
}

/// Runs `predict` over every batch of `stream` and writes the resulting
/// probabilities to a CSV file at `path`. Returns the number of rows.
///
/// # Errors
///
/// Returns an error if the file cannot be written, the stream fails, or
/// `predict` fails or returns the wrong number of values.
pub fn export_predictions<F>(
    stream: BatchStream,
    path: impl AsRef<Path>,
    predict: F,
) -> Result<usize>
where
    F: FnMut(&Batch) -> Result<Vec<f32>>,
{
    let path = path.as_ref();
    let mut sink = PredictionSink {
        writer: PredictionWriter::create(path)?,
        predict,
    };
    feed(stream, &mut sink, None)?;

    let rows = sink.writer.rows();
    info!(rows, path = %path.display(), "Wrote predictions");
    Ok(rows)
}

/// Quotes a field that contains a comma, quote or newline.
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        std::borrow::Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}
