use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::layers::dense::{Layer, LayerGradient};
use crate::math::matrix::Matrix;

/// A stack of dense layers split into feature stages followed by a
/// classifier head.
///
/// `layers[..n_features]` are the feature stages (the part pretrained by the
/// autoencoder and shifted by `transfer_difference`); the rest is the head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
    pub n_features: usize,
}

impl Network {
    pub fn new(layers: Vec<Layer>, n_features: usize) -> Network {
        assert!(n_features <= layers.len(), "more feature stages than layers");
        Network { layers, n_features }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, Layer::input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.size)
    }

    pub fn stage_count(&self) -> usize {
        self.n_features
    }

    pub fn stages(&self) -> &[Layer] {
        &self.layers[..self.n_features]
    }

    pub fn stages_mut(&mut self) -> &mut [Layer] {
        &mut self.layers[..self.n_features]
    }

    /// Forward pass; stores activations in each layer for backprop.
    pub fn forward(&mut self, input: Vec<f64>) -> Vec<f64> {
        let mut current = input;
        for layer in &mut self.layers {
            current = layer.forward(current);
        }
        current
    }

    /// Forward pass without touching the layer caches. Safe to call from
    /// several threads at once.
    pub fn predict(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in &self.layers {
            current = layer.predict(&current);
        }
        current
    }

    /// Runs only the feature stages.
    pub fn encode(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in self.stages() {
            current = layer.predict(&current);
        }
        current
    }

    /// Backward pass for the sample last seen by `forward`.
    ///
    /// `output_delta` is ∂L/∂output. Gradients are returned in layer order.
    pub fn backward(&self, output_delta: Vec<f64>) -> Vec<LayerGradient> {
        let mut delta = Matrix::row(output_delta);
        let mut grads = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter().rev() {
            let (grad, previous) = layer.backward(&delta);
            grads.push(grad);
            delta = previous;
        }
        grads.reverse();
        grads
    }

    /// Zeroed gradient storage matching every layer.
    pub fn zero_gradients(&self) -> Vec<LayerGradient> {
        self.layers.iter().map(LayerGradient::zeros_for).collect()
    }

    /// Serializes the network weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny() -> Network {
        let mut rng = StdRng::seed_from_u64(1);
        Network::new(
            vec![
                Layer::new(3, 4, ActivationFunction::ReLU, &mut rng),
                Layer::new(2, 3, ActivationFunction::Softmax, &mut rng),
            ],
            1,
        )
    }

    #[test]
    fn backward_returns_one_gradient_per_layer() {
        let mut net = tiny();
        let out = net.forward(vec![0.1, 0.2, 0.3, 0.4]);
        let grads = net.backward(out.iter().map(|p| p - 0.5).collect());
        assert_eq!(grads.len(), 2);
        assert_eq!((grads[0].weights.rows, grads[0].weights.cols), (4, 3));
        assert_eq!((grads[1].weights.rows, grads[1].weights.cols), (3, 2));
    }

    #[test]
    fn json_round_trip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.json");
        let net = tiny();
        net.save_json(&path).unwrap();
        let loaded = Network::load_json(&path).unwrap();
        let x = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(net.predict(&x), loaded.predict(&x));
        assert_eq!(loaded.stage_count(), 1);
    }
}
