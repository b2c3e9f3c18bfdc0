use std::path::PathBuf;

use clap::{Args, Parser};
use serde::Serialize;

use crate::data::sampler::SamplerKind;
use crate::data::volume::Preprocessing;
use crate::optim::optimizer::{OptimizerConfig, OptimizerKind};
use crate::train::orchestrator::{TrainOptions, TrainingEvaluation};
use crate::transfer::greedy::PretrainOptions;

/// Optimisation, early stopping and cross-validation options shared by the
/// training binaries.
#[derive(Args, Debug, Clone, Serialize)]
pub struct TrainFlags {
    #[arg(long = "accumulation_steps", default_value_t = 1)]
    pub accumulation_steps: usize,

    /// Batches between two validations; 0 or 1 validates at epoch ends only.
    #[arg(long = "evaluation_steps", default_value_t = 1)]
    pub evaluation_steps: usize,

    #[arg(long = "training_evaluation", value_enum, default_value_t = TrainingEvaluation::WholeSet)]
    pub training_evaluation: TrainingEvaluation,

    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    #[arg(long = "learning_rate", default_value_t = 1e-4)]
    pub learning_rate: f64,

    /// Validations without improvement tolerated before stopping.
    #[arg(long, default_value_t = 10)]
    pub patience: usize,

    /// Minimum loss decrease that counts as an improvement.
    #[arg(long, default_value_t = 0.05)]
    pub tolerance: f64,

    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    #[arg(long = "weight_decay", default_value_t = 1e-4)]
    pub weight_decay: f64,

    #[arg(short = 's', long, value_enum, default_value_t = SamplerKind::Random)]
    pub sampler: SamplerKind,

    #[arg(long = "n_splits", default_value_t = 5)]
    pub n_splits: usize,

    /// Fold used for validation.
    #[arg(long, default_value_t = 0)]
    pub split: usize,

    #[arg(long)]
    pub gpu: bool,

    /// Threads used for forward-only evaluation.
    #[arg(long = "num_threads", default_value_t = 1)]
    pub num_threads: usize,

    /// Seeds fold assignment, initialisation and sampling.
    #[arg(long, default_value_t = 2)]
    pub seed: u64,
}

impl TrainFlags {
    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            epochs: self.epochs,
            accumulation_steps: self.accumulation_steps,
            evaluation_steps: self.evaluation_steps,
            patience: self.patience,
            tolerance: self.tolerance,
            training_evaluation: self.training_evaluation,
        }
    }

    pub fn optimizer_config(&self, features_learning_rate: Option<f64>) -> OptimizerConfig {
        OptimizerConfig {
            kind: self.optimizer,
            learning_rate: self.learning_rate,
            features_learning_rate,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
        }
    }
}

/// Initialisation from pretrained weights.
#[derive(Args, Debug, Clone, Serialize)]
pub struct TransferFlags {
    /// Pretrained weights; a path that does not exist asks for autoencoder
    /// pretraining whose result is saved in the output directory.
    #[arg(short = 't', long = "transfer_learning")]
    pub transfer_learning: Option<PathBuf>,

    /// Diagnoses the autoencoder is pretrained on.
    #[arg(long = "transfer_learning_diagnoses", num_args = 1..)]
    pub transfer_learning_diagnoses: Option<Vec<String>>,

    #[arg(long = "transfer_learning_epochs", default_value_t = 10)]
    pub transfer_learning_epochs: usize,

    #[arg(long = "transfer_learning_rate", default_value_t = 1e-4)]
    pub transfer_learning_rate: f64,

    /// Learning rate of the pretrained stages during fine-tuning.
    #[arg(long = "features_learning_rate")]
    pub features_learning_rate: Option<f64>,

    /// Save slices of an input and its reconstruction after pretraining.
    #[arg(long)]
    pub visualization: bool,

    /// Leading stages of the network left out of the weight copy.
    #[arg(long = "transfer_difference", default_value_t = 0)]
    pub transfer_difference: usize,

    /// End the decoder with a sigmoid.
    #[arg(long = "add_sigmoid")]
    pub add_sigmoid: bool,
}

impl TransferFlags {
    pub fn pretrain_options(&self, optimizer: OptimizerKind) -> PretrainOptions {
        PretrainOptions {
            epochs: self.transfer_learning_epochs,
            learning_rate: self.transfer_learning_rate,
            optimizer,
            add_sigmoid: self.add_sigmoid,
        }
    }
}

/// Subject-level classification of whole MRI volumes.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(name = "subject-cnn", version, about, allow_negative_numbers = true)]
pub struct SubjectArgs {
    /// Directory holding `train.tsv`, or a single table.
    pub diagnosis_path: PathBuf,

    pub output_dir: PathBuf,

    /// CAPS directory of preprocessed images.
    pub input_dir: PathBuf,

    /// Registered architecture name.
    pub model: String,

    #[arg(long, value_enum, default_value_t = Preprocessing::Linear)]
    pub preprocessing: Preprocessing,

    #[arg(short = 'd', long, num_args = 1.., default_values_t = ["AD".to_string(), "CN".to_string()])]
    pub diagnoses: Vec<String>,

    /// Keep only the first session of each participant.
    #[arg(long)]
    pub baseline: bool,

    #[arg(long = "batch_size", default_value_t = 2)]
    pub batch_size: usize,

    #[arg(short = 'w', long = "num_workers", default_value_t = 1)]
    pub num_workers: usize,

    #[arg(short = 'n', long)]
    pub minmaxnormalization: bool,

    #[command(flatten)]
    pub train: TrainFlags,

    #[command(flatten)]
    pub transfer: TransferFlags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn defaults_follow_the_command_line_reference() {
        let args = SubjectArgs::try_parse_from(["subject-cnn", "tsv", "out", "caps", "Conv_5_FC_3"]).unwrap();
        assert_eq!(args.batch_size, 2);
        assert_eq!(args.diagnoses, vec!["AD", "CN"]);
        assert_eq!(args.train.epochs, 20);
        assert_eq!(args.train.patience, 10);
        assert_eq!(args.train.n_splits, 5);
        assert_eq!(args.train.seed, 2);
        assert_eq!(args.train.optimizer, OptimizerKind::Adam);
        assert_eq!(args.transfer.transfer_learning_epochs, 10);
        assert!(args.transfer.transfer_learning.is_none());
    }

    #[test]
    fn snake_case_flags_and_shorts_parse() {
        let args = SubjectArgs::try_parse_from([
            "subject-cnn", "tsv", "out", "caps", "Test", "--batch_size", "4", "-d", "sMCI", "pMCI", "-w", "3",
            "-n", "--optimizer", "SGD", "-s", "weighted", "--training_evaluation", "n_batches", "-t", "ae.json",
            "--transfer_difference", "2", "--evaluation_steps", "4", "--accumulation_steps", "2",
        ])
        .unwrap();
        assert_eq!(args.batch_size, 4);
        assert_eq!(args.diagnoses, vec!["sMCI", "pMCI"]);
        assert_eq!(args.num_workers, 3);
        assert!(args.minmaxnormalization);
        assert_eq!(args.train.optimizer, OptimizerKind::Sgd);
        assert_eq!(args.train.sampler, SamplerKind::Weighted);
        assert_eq!(args.train.training_evaluation, TrainingEvaluation::NBatches);
        assert_eq!(args.transfer.transfer_learning, Some(PathBuf::from("ae.json")));
        assert!(args.train.train_options().validate().is_ok());
    }

    #[test]
    fn negative_values_reach_their_options() {
        let argv = ["subject-cnn", "tsv", "out", "caps", "Test", "--tolerance", "-0.01", "--momentum", "-0.5"]
            .map(String::from);
        let args: SubjectArgs = crate::cli::parse_args(argv, crate::cli::UnknownArgs::Fail).unwrap();
        assert_eq!(args.train.tolerance, -0.01);
        assert_eq!(args.train.momentum, -0.5);
        assert_eq!(args.model, "Test");
    }

    #[test]
    fn command_definition_is_consistent() {
        SubjectArgs::command().debug_assert();
    }
}
