use std::fs;
use std::io::Write;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::cli::subject::SubjectArgs;
use crate::cli::write_commandline;
use crate::data::dataset::{Dataset, MriDataset};
use crate::data::loader::{DataLoader, Order};
use crate::data::split::split_folds;
use crate::data::table::{load_table, write_table};
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

#[derive(Debug, Clone)]
pub struct SubjectOutcome {
    pub training: TrainOutcome,
    /// Epoch of the reloaded `best_loss` checkpoint.
    pub best_epoch: usize,
    pub train_accuracy: f64,
    pub valid_accuracy: f64,
    pub elapsed_seconds: f64,
}

/// Trains and evaluates one whole-volume classifier on fold `split`.
pub fn run(args: &SubjectArgs) -> Result<SubjectOutcome> {
    let start = Instant::now();
    let registry = Registry::default();
    registry.validate(&args.model)?;
    let options = args.train.train_options();
    options.validate()?;
    check_batch_size(args.batch_size)?;
    configure_threads(args.train.num_threads);

    write_commandline(&args.output_dir, "CNN", args)?;
    write_version(&args.output_dir)?;

    let table = resolve_table(&args.diagnosis_path, "train.tsv");
    let rows = load_table(&table, &args.diagnoses, args.baseline)?;
    let split = split_folds(&rows, args.train.split, args.train.n_splits, args.train.seed)?;
    let layout = RunLayout::subject(&args.output_dir, args.train.split);
    write_table(layout.log_dir().join("train.tsv"), &split.train)?;
    write_table(layout.log_dir().join("valid.tsv"), &split.valid)?;
    info!(
        "fold {}: {} training and {} validation images",
        args.train.split,
        split.train.len(),
        split.valid.len()
    );

    let images = |rows, diagnoses: &[String]| {
        MriDataset::new(&args.input_dir, rows, diagnoses, args.preprocessing, args.minmaxnormalization)
    };
    let train_set = images(split.train, &args.diagnoses)?;
    let valid_set = images(split.valid, &args.diagnoses)?;
    if train_set.is_empty() || valid_set.is_empty() {
        return Err(Error::Config(format!("fold {} leaves one side of the split empty", args.train.split)));
    }
    let dims = Volume::read_dims(train_set.image_path(0))?;

    let mut rng = StdRng::seed_from_u64(args.train.seed);
    let mut network = registry.create(
        &args.model,
        dims.iter().product(),
        args.diagnoses.len(),
        Device::from_flag(args.train.gpu),
        &mut rng,
    )?;

    let context = TransferContext {
        flags: &args.transfer,
        optimizer: args.train.optimizer,
        output_dir: &args.output_dir,
        table: &table,
        baseline: args.baseline,
        split: args.train.split,
        n_splits: args.train.n_splits,
        seed: args.train.seed,
        batch_size: args.batch_size,
        num_workers: args.num_workers,
        volume_dims: Some(dims),
    };
    let source = resolve_transfer_source(
        &context,
        &network,
        |rows, diagnoses| Ok(Box::new(images(rows, diagnoses)?) as Box<dyn Dataset>),
        &mut rng,
    )?;
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
        architecture: Some(args.model.clone()),
        input: Some(InputShape::Volume { dims }),
        diagnoses: args.diagnoses.clone(),
    };
    let mut sink = DirectorySink::new(layout.clone(), metadata);
    let history = HistoryLog::create(layout.log_dir().join("training.tsv"))?;
    let training = Trainer::new(&options, &mut sink)
        .with_history(history)
        .run(&mut network, &mut optimizer, &train_loader, &valid_loader, &mut rng)?;

    let (best, best_epoch) = load_model(layout.best_model_dir(Selection::BestLoss))?;
    let train_eval = DataLoader::new(&train_set, args.batch_size, args.num_workers, Order::Sequential, false)?;
    let train_accuracy = test(&best, &train_eval)?.accuracy;
    let valid_accuracy = test(&best, &valid_loader)?.accuracy;
    let elapsed_seconds = start.elapsed().as_secs_f64();

    let summary_path = layout.log_dir().join("fold_output.txt");
    let mut summary = fs::File::create(&summary_path)?;
    writeln!(summary, "best_epoch: {}", best_epoch)?;
    writeln!(summary, "elapsed_time: {:.2} s", elapsed_seconds)?;
    writeln!(summary, "train_accuracy: {:.2} %", train_accuracy * 100.0)?;
    writeln!(summary, "valid_accuracy: {:.2} %", valid_accuracy * 100.0)?;
    info!(
        "best_loss model from epoch {}: train accuracy {:.2}%, valid accuracy {:.2}% ({:.1} s)",
        best_epoch,
        train_accuracy * 100.0,
        valid_accuracy * 100.0,
        elapsed_seconds
    );

    Ok(SubjectOutcome { training, best_epoch, train_accuracy, valid_accuracy, elapsed_seconds })
}
