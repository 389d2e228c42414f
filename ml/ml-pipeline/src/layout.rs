//! Per-run directory layout for logs, checkpoints and predictions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Where a named run keeps its artifacts.
///
/// Logs and checkpoints live in one subdirectory per run name; predictions
/// are written to `<data_dir>/<name>.csv`.
///
/// # Example
///
/// ```
/// use std::path::Path;
///
/// use ml_pipeline::RunLayout;
///
/// let layout = RunLayout::under("/data");
/// assert_eq!(layout.log_dir("cnn"), Path::new("/data/logs/cnn"));
/// assert_eq!(layout.prediction_file("cnn"), Path::new("/data/cnn.csv"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLayout {
    /// Directory holding prediction files.
    pub data_dir: PathBuf,

    /// Parent of the per-run log directories.
    pub log_dir: PathBuf,

    /// Parent of the per-run checkpoint directories.
    pub checkpoint_dir: PathBuf,
}

impl RunLayout {
    /// Creates a layout from explicit directories.
    #[must_use]
    pub fn new(
        data_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        checkpoint_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_dir: log_dir.into(),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Creates the conventional layout: `root`, `root/logs`, `root/checkpoints`.
    #[must_use]
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root, root.join("logs"), root.join("checkpoints"))
    }

    /// Returns the log directory of a run.
    #[must_use]
    pub fn log_dir(&self, name: &str) -> PathBuf {
        self.log_dir.join(name)
    }

    /// Returns the checkpoint directory of a run.
    #[must_use]
    pub fn checkpoint_dir(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(name)
    }

    /// Returns the prediction file of a run.
    #[must_use]
    pub fn prediction_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.csv"))
    }

    /// Creates the log and checkpoint directories of a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, a regular file is in the
    /// way, or a directory cannot be created.
    pub fn prepare(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        for dir in [self.log_dir(name), self.checkpoint_dir(name)] {
            if dir.exists() && !dir.is_dir() {
                return Err(PipelineError::Io(format!(
                    "{} exists and is not a directory",
                    dir.display()
                )));
            }
            fs::create_dir_all(&dir)?;
        }
        debug!(run = name, "Prepared run directories");
        Ok(())
    }

    /// Removes artifacts of a previous run.
    ///
    /// With `fresh`, files in the run's log and checkpoint directories are
    /// deleted (the directories stay). A stale prediction file is always
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or a file cannot be removed.
    pub fn cleanup(&self, name: &str, fresh: bool) -> Result<()> {
        validate_name(name)?;
        let mut removed = 0;
        if fresh {
            for dir in [self.log_dir(name), self.checkpoint_dir(name)] {
                removed += remove_files_in(&dir)?;
            }
        }

        let predictions = self.prediction_file(name);
        if predictions.is_file() {
            fs::remove_file(&predictions)?;
            removed += 1;
        }
        debug!(run = name, removed, "Cleaned up run artifacts");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
    {
        return Err(PipelineError::invalid_config(format!(
            "invalid run name: {name:?}"
        )));
    }
    Ok(())
}

fn remove_files_in(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.prepare("bottleneck").unwrap();
        assert!(layout.log_dir("bottleneck").is_dir());
        assert!(layout.checkpoint_dir("bottleneck").is_dir());
        // Idempotent
        layout.prepare("bottleneck").unwrap();
    }

    #[test]
    fn prepare_rejects_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        fs::create_dir_all(&layout.log_dir).unwrap();
        fs::write(layout.log_dir("cnn"), b"not a dir").unwrap();
        assert!(matches!(layout.prepare("cnn"), Err(PipelineError::Io(_))));
    }

    #[test]
    fn cleanup_fresh_removes_logs_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.prepare("cnn").unwrap();
        fs::write(layout.log_dir("cnn").join("events.log"), b"x").unwrap();
        fs::write(layout.checkpoint_dir("cnn").join("model-100.bin"), b"x").unwrap();
        fs::write(layout.prediction_file("cnn"), b"id,label\n").unwrap();

        layout.cleanup("cnn", true).unwrap();
        assert!(layout.log_dir("cnn").is_dir());
        assert_eq!(fs::read_dir(layout.log_dir("cnn")).unwrap().count(), 0);
        assert_eq!(fs::read_dir(layout.checkpoint_dir("cnn")).unwrap().count(), 0);
        assert!(!layout.prediction_file("cnn").exists());
    }

    #[test]
    fn cleanup_resume_keeps_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        layout.prepare("cnn").unwrap();
        let checkpoint = layout.checkpoint_dir("cnn").join("model-100.bin");
        fs::write(&checkpoint, b"x").unwrap();
        fs::write(layout.prediction_file("cnn"), b"id,label\n").unwrap();

        layout.cleanup("cnn", false).unwrap();
        assert!(checkpoint.exists());
        assert!(!layout.prediction_file("cnn").exists());
    }

    #[test]
    fn invalid_names_rejected() {
        let layout = RunLayout::under("/tmp");
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(layout.prepare(name).is_err(), "{name:?}");
        }
    }
}
