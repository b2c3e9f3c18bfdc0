use anyhow::Result;
use cortex_nn::cli::{init_tracing, parse_args, PatchTrainArgs, UnknownArgs};
use cortex_nn::pipeline::run_patch_train;

fn main() -> Result<()> {
    init_tracing();
    let args: PatchTrainArgs = parse_args(std::env::args(), UnknownArgs::Fail)?;
    run_patch_train(&args)?;
    Ok(())
}
