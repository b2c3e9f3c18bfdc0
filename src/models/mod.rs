pub mod registry;

pub use registry::{Device, Registry};
