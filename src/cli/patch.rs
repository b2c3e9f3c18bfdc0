use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::cli::subject::{TrainFlags, TransferFlags};
use crate::data::volume::Preprocessing;
use crate::train::checkpoint::Selection;
use crate::voting::results::EvalMode;

/// Trains one classifier per patch index.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "patch-cnn-train", version, about, allow_negative_numbers = true)]
pub struct PatchTrainArgs {
    pub diagnosis_path: PathBuf,

    pub output_dir: PathBuf,

    pub caps_directory: PathBuf,

    #[arg(long, value_enum, default_value_t = Preprocessing::Linear)]
    pub preprocessing: Preprocessing,

    #[arg(short = 'd', long, num_args = 1.., default_values_t = ["sMCI".to_string(), "pMCI".to_string()])]
    pub diagnoses: Vec<String>,

    #[arg(long)]
    pub baseline: bool,

    /// Side of the cubic patches.
    #[arg(long = "patch_size", default_value_t = 50)]
    pub patch_size: usize,

    #[arg(long = "patch_stride", default_value_t = 50)]
    pub patch_stride: usize,

    #[arg(long, default_value = "Conv_4_FC_3")]
    pub network: String,

    /// Number of classifiers, trained on patches `0..num_cnn`.
    #[arg(long = "num_cnn", default_value_t = 36)]
    pub num_cnn: usize,

    #[arg(long = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    #[arg(short = 'w', long = "num_workers", default_value_t = 8)]
    pub num_workers: usize,

    #[command(flatten)]
    pub train: TrainFlags,

    #[command(flatten)]
    pub transfer: TransferFlags,
}

/// Evaluates the patch classifiers of one fold and votes per subject.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "patch-cnn-test", version, about, allow_negative_numbers = true)]
pub struct PatchTestArgs {
    pub caps_directory: PathBuf,

    /// Table of the rows to evaluate.
    pub diagnosis_tsv_path: PathBuf,

    /// Output directory of the training run.
    pub output_dir: PathBuf,

    /// Checkpoint each classifier is loaded from.
    #[arg(long, value_enum, default_value_t = Selection::BestAcc)]
    pub selection: Selection,

    #[arg(long, value_enum, default_value_t = Preprocessing::Linear)]
    pub preprocessing: Preprocessing,

    #[arg(long = "patch_size", default_value_t = 50)]
    pub patch_size: usize,

    #[arg(long = "patch_stride", default_value_t = 50)]
    pub patch_stride: usize,

    /// `test` evaluates the whole table, `valid` the validation side of the fold.
    #[arg(long, value_enum, default_value_t = EvalMode::Test)]
    pub mode: EvalMode,

    #[arg(long, default_value = "Conv_4_FC_3")]
    pub network: String,

    #[arg(long = "num_cnn", default_value_t = 36)]
    pub num_cnn: usize,

    #[arg(long = "diagnoses_list", num_args = 1.., default_values_t = ["sMCI".to_string(), "pMCI".to_string()])]
    pub diagnoses_list: Vec<String>,

    #[arg(long, default_value_t = 0)]
    pub split: usize,

    #[arg(long = "n_splits", default_value_t = 5)]
    pub n_splits: usize,

    /// Seed of the fold assignment used at training time.
    #[arg(long, default_value_t = 2)]
    pub seed: u64,

    #[arg(long = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long = "num_workers", default_value_t = 8)]
    pub num_workers: usize,

    #[arg(long)]
    pub gpu: bool,

    /// Classifiers whose validation balanced accuracy is lower do not vote.
    #[arg(long = "min_confidence", default_value_t = 0.0)]
    pub min_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_defaults() {
        let args = PatchTestArgs::try_parse_from(["patch-cnn-test", "caps", "test.tsv", "out"]).unwrap();
        assert_eq!(args.selection, Selection::BestAcc);
        assert_eq!(args.mode, EvalMode::Test);
        assert_eq!(args.num_cnn, 36);
        assert_eq!(args.diagnoses_list, vec!["sMCI", "pMCI"]);
        assert_eq!(args.batch_size, 32);
        assert_eq!(args.min_confidence, 0.0);
    }

    #[test]
    fn train_flags_are_shared() {
        let args = PatchTrainArgs::try_parse_from([
            "patch-cnn-train", "tsv", "out", "caps", "--num_cnn", "4", "--patch_size", "2", "--epochs", "3",
        ])
        .unwrap();
        assert_eq!(args.num_cnn, 4);
        assert_eq!(args.patch_size, 2);
        assert_eq!(args.train.epochs, 3);
        assert_eq!(args.network, "Conv_4_FC_3");
    }

    #[test]
    fn command_definitions_are_consistent() {
        PatchTrainArgs::command().debug_assert();
        PatchTestArgs::command().debug_assert();
    }
}
