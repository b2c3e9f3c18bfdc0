use std::fs::{self, File};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// One validation point of a training run.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub epoch: usize,
    pub iteration: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
    pub valid_balanced_accuracy: f64,
}

/// Tab-separated `training.tsv`, flushed after every row so an interrupted
/// run keeps its history.
pub struct HistoryLog {
    writer: csv::Writer<File>,
}

impl HistoryLog {
    pub fn create(path: impl AsRef<Path>) -> Result<HistoryLog> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        Ok(HistoryLog { writer })
    }

    pub fn append(&mut self, row: &HistoryRow) -> Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}
