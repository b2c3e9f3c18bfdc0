use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::layers::dense::Layer;
use crate::network::network::Network;

/// Describes one layer in a network specification.
///
/// `size` is the number of output neurons; the input size is implied by the
/// previous layer (or the raw input dimension for the first one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: ActivationFunction,
}

impl LayerSpec {
    pub fn new(size: usize, activation: ActivationFunction) -> LayerSpec {
        LayerSpec { size, activation }
    }
}

/// Architecture description: feature stages then classifier head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_size: usize,
    pub stages: Vec<LayerSpec>,
    pub classifier: Vec<LayerSpec>,
}

impl NetworkSpec {
    /// Instantiates freshly initialised weights for this architecture.
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Network {
        let mut layers = Vec::with_capacity(self.stages.len() + self.classifier.len());
        let mut fan_in = self.input_size;
        for spec in self.stages.iter().chain(self.classifier.iter()) {
            layers.push(Layer::new(spec.size, fan_in, spec.activation, rng));
            fan_in = spec.size;
        }
        Network::new(layers, self.stages.len())
    }
}
