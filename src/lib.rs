pub mod activation;
pub mod cli;
pub mod data;
pub mod error;
pub mod layers;
pub mod layout;
pub mod loss;
pub mod math;
pub mod models;
pub mod network;
pub mod optim;
pub mod pipeline;
pub mod train;
pub mod transfer;
pub mod voting;

// Convenience re-exports
pub use activation::activation::ActivationFunction;
pub use error::{Error, Result};
pub use layers::dense::Layer;
pub use math::matrix::Matrix;
pub use models::registry::{Device, Registry};
pub use network::network::Network;
pub use train::orchestrator::{RunState, TrainOptions, Trainer};
