pub mod autoencoder;
pub mod greedy;
pub mod loader;
pub mod visualization;

pub use autoencoder::{Autoencoder, AutoencoderCheckpoint};
pub use greedy::{greedy_learning, PretrainOptions, PretrainOutcome};
pub use loader::{
    apply_autoencoder_weights, apply_pretrained_network_weights, apply_transfer, detect_kind, plan_transfer,
    CheckpointKind, TransferPlan, TransferReport,
};
pub use visualization::write_reconstruction;
