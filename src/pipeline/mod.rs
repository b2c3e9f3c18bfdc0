//! End-to-end runs behind the binaries.

pub mod patch;
pub mod subject;

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info};

use crate::cli::subject::TransferFlags;
use crate::data::dataset::Dataset;
use crate::data::loader::{DataLoader, Order};
use crate::data::sampler::SamplerKind;
use crate::data::split::split_folds;
use crate::data::table::{load_table, SampleRow};
use crate::error::{Error, Result};
use crate::layout::pretraining_dir;
use crate::network::network::Network;
use crate::optim::optimizer::OptimizerKind;
use crate::transfer::greedy::greedy_learning;
use crate::transfer::loader::{plan_transfer, TransferPlan};
use crate::transfer::visualization::write_reconstruction;

pub use patch::{run_test as run_patch_test, run_train as run_patch_train, PatchTrainOutcome};
pub use subject::{run as run_subject, SubjectOutcome};

/// Sizes the global rayon pool used for forward-only evaluation. Only the
/// first call in a process takes effect.
pub(crate) fn configure_threads(num_threads: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(num_threads.max(1)).build_global() {
        debug!("keeping the existing global thread pool: {}", e);
    }
}

pub(crate) fn write_version(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    fs::write(output_dir.join("version.txt"), format!("{}\n", env!("CARGO_PKG_VERSION")))?;
    Ok(())
}

/// A directory argument stands for the `name` table inside it.
pub(crate) fn resolve_table(path: &Path, name: &str) -> PathBuf {
    if path.is_dir() {
        path.join(name)
    } else {
        path.to_path_buf()
    }
}

pub(crate) fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(Error::Config("batch_size must be at least 1".into()));
    }
    Ok(())
}

/// Everything pretraining needs besides the network.
pub(crate) struct TransferContext<'a> {
    pub flags: &'a TransferFlags,
    pub optimizer: OptimizerKind,
    pub output_dir: &'a Path,
    pub table: &'a Path,
    pub baseline: bool,
    pub split: usize,
    pub n_splits: usize,
    pub seed: u64,
    pub batch_size: usize,
    pub num_workers: usize,
    /// Known for whole-volume inputs; enables `--visualization`.
    pub volume_dims: Option<[usize; 3]>,
}

/// Weight file to transplant and the stage shift to apply, pretraining an
/// autoencoder first when the given path does not exist yet.
pub(crate) fn resolve_transfer_source<R, F>(
    ctx: &TransferContext<'_>,
    network: &Network,
    make_dataset: F,
    rng: &mut R,
) -> Result<Option<(PathBuf, usize)>>
where
    R: Rng + ?Sized,
    F: Fn(Vec<SampleRow>, &[String]) -> Result<Box<dyn Dataset>>,
{
    let path = match &ctx.flags.transfer_learning {
        Some(path) => path,
        None => return Ok(None),
    };
    let diagnoses = match plan_transfer(path, ctx.flags.transfer_learning_diagnoses.as_deref())? {
        TransferPlan::Load(path) => return Ok(Some((path, ctx.flags.transfer_difference))),
        TransferPlan::Pretrain { diagnoses } => diagnoses,
    };
    if ctx.flags.transfer_learning_epochs == 0 {
        return Err(Error::Config(format!(
            "{} does not exist and transfer_learning_epochs 0 cannot pretrain a replacement",
            path.display()
        )));
    }

    info!("{} does not exist, pretraining an autoencoder on {:?}", path.display(), diagnoses);
    let rows = load_table(ctx.table, &diagnoses, ctx.baseline)?;
    let split = split_folds(&rows, ctx.split, ctx.n_splits, ctx.seed)?;
    let train_set = make_dataset(split.train, &diagnoses)?;
    let valid_set = make_dataset(split.valid, &diagnoses)?;
    let train_loader = DataLoader::new(
        train_set.as_ref(),
        ctx.batch_size,
        ctx.num_workers,
        Order::Sampled(SamplerKind::Random),
        false,
    )?;
    let valid_loader = DataLoader::new(valid_set.as_ref(), ctx.batch_size, ctx.num_workers, Order::Sequential, false)?;

    let outcome = greedy_learning(
        network,
        &train_loader,
        &valid_loader,
        &ctx.flags.pretrain_options(ctx.optimizer),
        ctx.output_dir,
        rng,
    )?;

    if ctx.flags.visualization {
        match ctx.volume_dims {
            Some(dims) if !valid_set.is_empty() => {
                let sample = valid_set.get(0)?;
                let dir = pretraining_dir(ctx.output_dir).join("visualization");
                write_reconstruction(&outcome.autoencoder, &sample.input, dims, &dir)?;
                info!("reconstruction of {} {} written to {}", sample.participant_id, sample.session_id, dir.display());
            }
            _ => info!("nothing to visualise for this input shape"),
        }
    }

    // pretrained stages line up with the network's own
    Ok(Some((outcome.checkpoint_path, 0)))
}
