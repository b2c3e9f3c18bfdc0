pub mod adadelta;
pub mod adam;
pub mod optimizer;
pub mod sgd;

pub use optimizer::{Optimizer, OptimizerConfig, OptimizerKind};
