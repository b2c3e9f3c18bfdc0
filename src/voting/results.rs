//! Per-classifier result tables of a patch ensemble.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::fold_performance_dir;
use crate::train::evaluate::{accuracy, balanced_accuracy, Prediction};

/// Which rows a result table was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    Test,
    /// The validation side of a fold.
    Valid,
}

impl EvalMode {
    /// Prefix of the result file names.
    pub fn prefix(self) -> &'static str {
        match self {
            EvalMode::Test => "test",
            EvalMode::Valid => "validation",
        }
    }
}

/// One prediction of one patch classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchResult {
    pub participant_id: String,
    pub session_id: String,
    pub y: usize,
    pub y_hat: usize,
    /// Probability of `y_hat`.
    pub probability: f64,
    pub patch_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatchMetrics {
    pub accuracy: f64,
    pub balanced_accuracy: f64,
}

impl PatchMetrics {
    pub fn from_results(results: &[PatchResult]) -> PatchMetrics {
        let y: Vec<usize> = results.iter().map(|r| r.y).collect();
        let y_hat: Vec<usize> = results.iter().map(|r| r.y_hat).collect();
        PatchMetrics { accuracy: accuracy(&y, &y_hat), balanced_accuracy: balanced_accuracy(&y, &y_hat) }
    }
}

pub fn classifier_dir(output_dir: &Path, fold: usize, patch_index: usize) -> PathBuf {
    fold_performance_dir(output_dir, fold).join(format!("cnn-{}", patch_index))
}

pub fn result_path(output_dir: &Path, fold: usize, patch_index: usize, mode: EvalMode) -> PathBuf {
    classifier_dir(output_dir, fold, patch_index)
        .join(format!("{}_patch_level_result-patch_index.tsv", mode.prefix()))
}

pub fn metrics_path(output_dir: &Path, fold: usize, patch_index: usize, mode: EvalMode) -> PathBuf {
    classifier_dir(output_dir, fold, patch_index).join(format!("{}_patch_level_metrics.tsv", mode.prefix()))
}

pub fn patch_results(predictions: &[Prediction], patch_index: usize) -> Vec<PatchResult> {
    predictions
        .iter()
        .map(|p| PatchResult {
            participant_id: p.participant_id.clone(),
            session_id: p.session_id.clone(),
            y: p.y,
            y_hat: p.y_hat,
            probability: p.probability(),
            patch_index,
        })
        .collect()
}

pub(crate) fn write_tsv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_tsv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<T>, csv::Error>>()?;
    Ok(rows)
}

/// Writes the predictions of classifier `patch_index` and its metrics.
pub fn hard_voting_to_tsvs(
    output_dir: &Path,
    fold: usize,
    mode: EvalMode,
    patch_index: usize,
    predictions: &[Prediction],
) -> Result<PatchMetrics> {
    let results = patch_results(predictions, patch_index);
    let metrics = PatchMetrics::from_results(&results);
    write_tsv(&result_path(output_dir, fold, patch_index, mode), &results)?;
    write_tsv(&metrics_path(output_dir, fold, patch_index, mode), &[metrics])?;
    Ok(metrics)
}

pub fn read_patch_results(output_dir: &Path, fold: usize, patch_index: usize, mode: EvalMode) -> Result<Vec<PatchResult>> {
    read_tsv(&result_path(output_dir, fold, patch_index, mode))
}

pub fn read_patch_metrics(output_dir: &Path, fold: usize, patch_index: usize, mode: EvalMode) -> Result<PatchMetrics> {
    let path = metrics_path(output_dir, fold, patch_index, mode);
    read_tsv::<PatchMetrics>(&path)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Data(format!("{} holds no metrics row", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(participant: &str, y: usize, y_hat: usize, p: f64) -> Prediction {
        let mut probabilities = vec![0.0; 2];
        probabilities[y_hat] = p;
        probabilities[1 - y_hat] = 1.0 - p;
        Prediction {
            participant_id: participant.into(),
            session_id: "ses-M00".into(),
            y,
            y_hat,
            probabilities,
        }
    }

    #[test]
    fn tables_are_written_where_the_voter_reads_them() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = vec![prediction("sub-01", 0, 0, 0.8), prediction("sub-02", 1, 0, 0.6)];
        let metrics = hard_voting_to_tsvs(dir.path(), 1, EvalMode::Valid, 3, &predictions).unwrap();
        assert!((metrics.accuracy - 0.5).abs() < 1e-12);

        let path = dir.path().join("performances/fold_1/cnn-3/validation_patch_level_result-patch_index.tsv");
        assert!(path.is_file());
        let rows = read_patch_results(dir.path(), 1, 3, EvalMode::Valid).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].patch_index, 3);
        assert!((rows[1].probability - 0.6).abs() < 1e-12);

        let read = read_patch_metrics(dir.path(), 1, 3, EvalMode::Valid).unwrap();
        assert_eq!(read, metrics);
    }
}
