use anyhow::Result;
use cortex_nn::cli::{init_tracing, parse_args, SubjectArgs, UnknownArgs};
use cortex_nn::pipeline::run_subject;

fn main() -> Result<()> {
    init_tracing();
    let args: SubjectArgs = parse_args(std::env::args(), UnknownArgs::Warn)?;
    run_subject(&args)?;
    Ok(())
}
