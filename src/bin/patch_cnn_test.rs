use anyhow::Result;
use cortex_nn::cli::{init_tracing, parse_args, PatchTestArgs, UnknownArgs};
use cortex_nn::pipeline::run_patch_test;
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let args: PatchTestArgs = parse_args(std::env::args(), UnknownArgs::Fail)?;
    let summary = run_patch_test(&args)?;
    info!(
        "{} subjects voted: accuracy {:.2}%, balanced accuracy {:.2}%",
        summary.votes.len(),
        summary.metrics.accuracy * 100.0,
        summary.metrics.balanced_accuracy * 100.0
    );
    Ok(())
}
