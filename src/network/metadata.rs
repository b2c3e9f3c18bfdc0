use serde::{Deserialize, Serialize};

/// What a network was trained to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputShape {
    /// Whole preprocessed volume, flattened x-fastest.
    Volume { dims: [usize; 3] },
    /// One cubic patch of side `size` taken at `index` with `stride`.
    Patch { size: usize, stride: usize, index: usize },
}

/// Annotations stored next to the weights in every checkpoint.
/// All fields default so bare weight files still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub input: Option<InputShape>,
    /// Diagnosis labels in output-neuron order.
    #[serde(default)]
    pub diagnoses: Vec<String>,
}
