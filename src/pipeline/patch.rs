use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::cli::patch::{PatchTestArgs, PatchTrainArgs};
use crate::cli::write_commandline;
use crate::data::dataset::{Dataset, MriDataset, PatchDataset, PatchStackDataset};
use crate::data::loader::{DataLoader, Order};
use crate::data::split::{load_test_rows, split_folds};
use crate::data::table::{load_table, write_table, SampleRow};
use crate::data::volume::Volume;
use crate::error::{Error, Result};
use crate::layout::RunLayout;
use crate::models::registry::{Device, Registry};
use crate::network::metadata::{InputShape, ModelMetadata};
use crate::optim::optimizer::Optimizer;
use crate::pipeline::{check_batch_size, configure_threads, resolve_table, resolve_transfer_source, write_version, TransferContext};
use crate::train::checkpoint::{load_model, Selection};
use crate::train::evaluate::test;
use crate::train::history::HistoryLog;
use crate::train::orchestrator::{DirectorySink, TrainOutcome, Trainer};
use crate::transfer::loader::apply_transfer;
use crate::voting::results::{hard_voting_to_tsvs, EvalMode, PatchMetrics};
use crate::voting::soft_vote::{multi_cnn_soft_majority_voting, VoteSummary};

/// Checkpoint whose validation predictions give each classifier its voting
/// confidence.
const CONFIDENCE_SELECTION: Selection = Selection::BestAcc;

#[derive(Debug, Clone)]
pub struct PatchTrainOutcome {
    pub patch_index: usize,
    pub training: TrainOutcome,
    pub validation: PatchMetrics,
}

/// Patches available in the first image, which every image must share.
fn available_patches(images: &MriDataset, size: usize, stride: usize) -> Result<usize> {
    if images.is_empty() {
        return Err(Error::Config("no image to extract patches from".into()));
    }
    let dims = Volume::read_dims(images.image_path(0))?;
    Ok(Volume::patch_count(dims, size, stride))
}

fn check_ensemble(num_cnn: usize, available: usize, size: usize, stride: usize) -> Result<()> {
    if num_cnn == 0 || num_cnn > available {
        return Err(Error::Config(format!(
            "num_cnn {} must be between 1 and the {} patches of size {} stride {}",
            num_cnn, available, size, stride
        )));
    }
    Ok(())
}

/// Trains classifiers `0..num_cnn` of fold `split`, each on its own patch
/// index, then votes on the validation side.
pub fn run_train(args: &PatchTrainArgs) -> Result<Vec<PatchTrainOutcome>> {
    let registry = Registry::default();
    registry.validate(&args.network)?;
    let options = args.train.train_options();
    options.validate()?;
    check_batch_size(args.batch_size)?;
    configure_threads(args.train.num_threads);

    write_commandline(&args.output_dir, "patch", args)?;
    write_version(&args.output_dir)?;

    let table = resolve_table(&args.diagnosis_path, "train.tsv");
    let rows = load_table(&table, &args.diagnoses, args.baseline)?;
    let split = split_folds(&rows, args.train.split, args.train.n_splits, args.train.seed)?;
    let fold = args.train.split;

    let images = |rows: Vec<SampleRow>, diagnoses: &[String]| {
        MriDataset::new(&args.caps_directory, rows, diagnoses, args.preprocessing, true)
    };
    let available = available_patches(&images(split.train.clone(), &args.diagnoses)?, args.patch_size, args.patch_stride)?;
    check_ensemble(args.num_cnn, available, args.patch_size, args.patch_stride)?;
    let input_size = args.patch_size.pow(3);
    let device = Device::from_flag(args.train.gpu);
    let mut rng = StdRng::seed_from_u64(args.train.seed);

    let template = registry.create(&args.network, input_size, args.diagnoses.len(), device, &mut rng)?;
    let context = TransferContext {
        flags: &args.transfer,
        optimizer: args.train.optimizer,
        output_dir: &args.output_dir,
        table: &table,
        baseline: args.baseline,
        split: fold,
        n_splits: args.train.n_splits,
        seed: args.train.seed,
        batch_size: args.batch_size,
        num_workers: args.num_workers,
        volume_dims: None,
    };
    let num_cnn = args.num_cnn;
    let source = resolve_transfer_source(
        &context,
        &template,
        |rows, diagnoses| {
            let stack = PatchStackDataset::new(images(rows, diagnoses)?, args.patch_size, args.patch_stride, num_cnn);
            Ok(Box::new(stack) as Box<dyn Dataset>)
        },
        &mut rng,
    )?;

    let mut outcomes = Vec::with_capacity(num_cnn);
    for n in 0..num_cnn {
        info!("training classifier cnn-{} of {}", n, num_cnn);
        let layout = RunLayout::patch(&args.output_dir, fold, n);
        write_table(layout.log_dir().join("train.tsv"), &split.train)?;
        write_table(layout.log_dir().join("valid.tsv"), &split.valid)?;
        let train_set = PatchDataset::new(images(split.train.clone(), &args.diagnoses)?, args.patch_size, args.patch_stride, n);
        let valid_set = PatchDataset::new(images(split.valid.clone(), &args.diagnoses)?, args.patch_size, args.patch_stride, n);

        let mut network = registry.create(&args.network, input_size, args.diagnoses.len(), device, &mut rng)?;
        let features_learning_rate = match &source {
            Some((path, difference)) => {
                apply_transfer(&mut network, path, *difference, &layout)?;
                args.transfer.features_learning_rate
            }
            None => None,
        };
        let mut optimizer = Optimizer::new(args.train.optimizer_config(features_learning_rate), &network);

        let train_loader =
            DataLoader::new(&train_set, args.batch_size, args.num_workers, Order::Sampled(args.train.sampler), true)?;
        let valid_loader = DataLoader::new(&valid_set, args.batch_size, args.num_workers, Order::Sequential, false)?;
        let metadata = ModelMetadata {
            architecture: Some(args.network.clone()),
            input: Some(InputShape::Patch { size: args.patch_size, stride: args.patch_stride, index: n }),
            diagnoses: args.diagnoses.clone(),
        };
        let mut sink = DirectorySink::new(layout.clone(), metadata);
        let history = HistoryLog::create(layout.log_dir().join("training.tsv"))?;
        let training = Trainer::new(&options, &mut sink)
            .with_history(history)
            .run(&mut network, &mut optimizer, &train_loader, &valid_loader, &mut rng)?;

        let (best, _) = load_model(layout.best_model_dir(CONFIDENCE_SELECTION))?;
        let report = test(&best, &valid_loader)?;
        let validation = hard_voting_to_tsvs(&args.output_dir, fold, EvalMode::Valid, n, &report.predictions)?;
        info!(
            "cnn-{}: validation accuracy {:.2}% balanced {:.2}%",
            n,
            validation.accuracy * 100.0,
            validation.balanced_accuracy * 100.0
        );
        outcomes.push(PatchTrainOutcome { patch_index: n, training, validation });
    }

    multi_cnn_soft_majority_voting(&args.output_dir, fold, num_cnn, EvalMode::Valid, 0.0)?;
    Ok(outcomes)
}

/// Runs every classifier of fold `split` on the requested rows and combines
/// them by soft majority voting.
pub fn run_test(args: &PatchTestArgs) -> Result<VoteSummary> {
    Registry::default().validate(&args.network)?;
    check_batch_size(args.batch_size)?;
    if args.gpu {
        warn!("no accelerator backend is available, inference runs on the CPU");
    }

    let rows = match args.mode {
        EvalMode::Test => load_test_rows(&args.diagnosis_tsv_path, &args.diagnoses_list)?,
        EvalMode::Valid => {
            let table = resolve_table(&args.diagnosis_tsv_path, "train.tsv");
            let rows = load_table(&table, &args.diagnoses_list, true)?;
            split_folds(&rows, args.split, args.n_splits, args.seed)?.valid
        }
    };
    let images = || {
        MriDataset::new(&args.caps_directory, rows.clone(), &args.diagnoses_list, args.preprocessing, true)
    };
    let available = available_patches(&images()?, args.patch_size, args.patch_stride)?;
    check_ensemble(args.num_cnn, available, args.patch_size, args.patch_stride)?;
    let input_size = args.patch_size.pow(3);

    for n in 0..args.num_cnn {
        let layout = RunLayout::patch(&args.output_dir, args.split, n);
        let (network, best_epoch) = load_model(layout.best_model_dir(args.selection))?;
        if network.input_size() != input_size {
            return Err(Error::Config(format!(
                "cnn-{} reads {} values, patches of size {} hold {}",
                n,
                network.input_size(),
                args.patch_size,
                input_size
            )));
        }
        info!("cnn-{}: {} model saved at epoch {}", n, args.selection.as_str(), best_epoch);

        let dataset = PatchDataset::new(images()?, args.patch_size, args.patch_stride, n);
        let loader = DataLoader::new(&dataset, args.batch_size, args.num_workers, Order::Sequential, false)?;
        let report = test(&network, &loader)?;
        info!("cnn-{}: patch-level balanced accuracy {:.4}", n, report.balanced_accuracy);
        hard_voting_to_tsvs(&args.output_dir, args.split, args.mode, n, &report.predictions)?;
    }

    multi_cnn_soft_majority_voting(&args.output_dir, args.split, args.num_cnn, args.mode, args.min_confidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensemble_must_fit_the_patch_grid() {
        assert!(check_ensemble(8, 8, 2, 2).is_ok());
        assert!(matches!(check_ensemble(9, 8, 2, 2), Err(Error::Config(_))));
        assert!(matches!(check_ensemble(0, 8, 2, 2), Err(Error::Config(_))));
    }
}
