use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::dense::Layer;
use crate::network::network::Network;
use crate::train::checkpoint::CHECKPOINT_FILE;

/// Encoder stages plus a mirrored decoder.
///
/// `decoder[j]` undoes `encoder[n - 1 - j]`, so the decoder runs from the
/// deepest code back to the input space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Autoencoder {
    pub encoder: Vec<Layer>,
    pub decoder: Vec<Layer>,
}

/// Activation of the decoder layer that reconstructs the input of stage
/// `stage`: the raw input for stage 0, a ReLU code otherwise.
pub(crate) fn decoder_activation(stage: usize, add_sigmoid: bool) -> ActivationFunction {
    match (stage, add_sigmoid) {
        (0, true) => ActivationFunction::Sigmoid,
        (0, false) => ActivationFunction::Identity,
        _ => ActivationFunction::ReLU,
    }
}

impl Autoencoder {
    /// Copies the stages of `network` as encoder and initialises a fresh
    /// mirrored decoder.
    pub fn from_network<R: Rng + ?Sized>(network: &Network, add_sigmoid: bool, rng: &mut R) -> Autoencoder {
        let encoder = network.stages().to_vec();
        let decoder = encoder
            .iter()
            .enumerate()
            .rev()
            .map(|(i, stage)| Layer::new(stage.input_size(), stage.size, decoder_activation(i, add_sigmoid), rng))
            .collect();
        Autoencoder { encoder, decoder }
    }

    /// Encoder and decoder as one trainable stack.
    pub fn to_network(&self) -> Network {
        let layers = self.encoder.iter().chain(self.decoder.iter()).cloned().collect();
        Network::new(layers, self.encoder.len())
    }

    /// Inverse of `to_network`.
    pub fn from_stack(network: Network) -> Autoencoder {
        let mut layers = network.layers;
        let decoder = layers.split_off(network.n_features);
        Autoencoder { encoder: layers, decoder }
    }

    pub fn reconstruct(&self, input: &[f64]) -> Vec<f64> {
        let mut current = input.to_vec();
        for layer in self.encoder.iter().chain(self.decoder.iter()) {
            current = layer.predict(&current);
        }
        current
    }
}

/// Pretrained autoencoder as stored on disk. The non-empty `decoder` is what
/// tells it apart from a classifier checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoencoderCheckpoint {
    pub epoch: usize,
    /// Validation reconstruction loss.
    pub value: f64,
    pub encoder: Vec<Layer>,
    pub decoder: Vec<Layer>,
}

impl AutoencoderCheckpoint {
    pub fn new(epoch: usize, value: f64, autoencoder: Autoencoder) -> AutoencoderCheckpoint {
        AutoencoderCheckpoint { epoch, value, encoder: autoencoder.encoder, decoder: autoencoder.decoder }
    }

    pub fn autoencoder(&self) -> Autoencoder {
        Autoencoder { encoder: self.encoder.clone(), decoder: self.decoder.clone() }
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(CHECKPOINT_FILE);
        let tmp = dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        {
            let writer = BufWriter::new(fs::File::create(&tmp)?);
            serde_json::to_writer(writer, self)?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<AutoencoderCheckpoint> {
        let path = path.as_ref();
        let checkpoint: AutoencoderCheckpoint = serde_json::from_reader(BufReader::new(fs::File::open(path)?))?;
        if checkpoint.decoder.is_empty() {
            return Err(Error::Transfer(format!("{} holds no decoder", path.display())));
        }
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::spec::{LayerSpec, NetworkSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn decoder_mirrors_the_stages() {
        let mut rng = StdRng::seed_from_u64(0);
        let network = NetworkSpec {
            input_size: 10,
            stages: vec![LayerSpec::new(6, ActivationFunction::ReLU), LayerSpec::new(3, ActivationFunction::ReLU)],
            classifier: vec![LayerSpec::new(2, ActivationFunction::Softmax)],
        }
        .build(&mut rng);

        let ae = Autoencoder::from_network(&network, true, &mut rng);
        assert_eq!(ae.encoder.len(), 2);
        assert_eq!((ae.decoder[0].input_size(), ae.decoder[0].size), (3, 6));
        assert_eq!((ae.decoder[1].input_size(), ae.decoder[1].size), (6, 10));
        assert_eq!(ae.decoder[1].activator, ActivationFunction::Sigmoid);
        assert_eq!(ae.reconstruct(&[0.5; 10]).len(), 10);

        let stack = ae.to_network();
        assert_eq!(stack.stage_count(), 2);
        let back = Autoencoder::from_stack(stack);
        assert_eq!(back.decoder.len(), 2);
    }
}
