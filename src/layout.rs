//! Output directory layout shared by the training and inference binaries.

use std::path::{Path, PathBuf};

use crate::train::checkpoint::Selection;

/// Paths of one classifier within one fold.
///
/// Subject-level runs live under `CNN/fold_<k>`, patch classifiers under
/// `fold_<k>/cnn-<n>`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub output_dir: PathBuf,
    pub kind: String,
    pub fold: usize,
    run_dir: PathBuf,
}

impl RunLayout {
    pub fn subject(output_dir: impl Into<PathBuf>, fold: usize) -> RunLayout {
        let kind = "CNN".to_string();
        let run_dir = Path::new(&kind).join(fold_name(fold));
        RunLayout { output_dir: output_dir.into(), kind, fold, run_dir }
    }

    pub fn patch(output_dir: impl Into<PathBuf>, fold: usize, patch_index: usize) -> RunLayout {
        let kind = format!("cnn-{}", patch_index);
        let run_dir = Path::new(&fold_name(fold)).join(&kind);
        RunLayout { output_dir: output_dir.into(), kind, fold, run_dir }
    }

    pub fn best_model_dir(&self, selection: Selection) -> PathBuf {
        self.output_dir.join("best_model_dir").join(&self.run_dir).join(selection.as_str())
    }

    /// Copies of the weights a run was initialised from.
    pub fn pretrained_dir(&self) -> PathBuf {
        self.output_dir.join("best_model_dir").join(&self.run_dir).join("pretrained")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output_dir.join("log_dir").join(&self.run_dir)
    }

    pub fn performance_dir(&self) -> PathBuf {
        fold_performance_dir(&self.output_dir, self.fold).join(&self.kind)
    }
}

fn fold_name(fold: usize) -> String {
    format!("fold_{}", fold)
}

pub fn fold_performance_dir(output_dir: &Path, fold: usize) -> PathBuf {
    output_dir.join("performances").join(fold_name(fold))
}

pub fn pretraining_dir(output_dir: &Path) -> PathBuf {
    output_dir.join("pretraining")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_and_patch_runs_nest_differently() {
        let subject = RunLayout::subject("/out", 2);
        assert_eq!(
            subject.best_model_dir(Selection::BestLoss),
            PathBuf::from("/out/best_model_dir/CNN/fold_2/best_loss")
        );
        assert_eq!(subject.performance_dir(), PathBuf::from("/out/performances/fold_2/CNN"));

        let patch = RunLayout::patch("/out", 0, 7);
        assert_eq!(
            patch.best_model_dir(Selection::BestAcc),
            PathBuf::from("/out/best_model_dir/fold_0/cnn-7/best_acc")
        );
        assert_eq!(patch.log_dir(), PathBuf::from("/out/log_dir/fold_0/cnn-7"));
        assert_eq!(patch.performance_dir(), PathBuf::from("/out/performances/fold_0/cnn-7"));
    }
}
