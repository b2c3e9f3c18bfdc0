//! Greedy layer-wise autoencoder pretraining.
//!
//! Each feature stage is trained as a one-layer autoencoder on the codes of
//! the stages below it, then the whole encoder/decoder stack is fine-tuned.

use std::path::{Path, PathBuf};

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::data::loader::DataLoader;
use crate::error::{Error, Result};
use crate::layers::dense::Layer;
use crate::layout::pretraining_dir;
use crate::loss::loss_type::{LossType, Target};
use crate::network::network::Network;
use crate::optim::optimizer::{Optimizer, OptimizerConfig, OptimizerKind};
use crate::train::orchestrator::apply_accumulated;
use crate::transfer::autoencoder::{Autoencoder, AutoencoderCheckpoint};

#[derive(Debug, Clone)]
pub struct PretrainOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    /// End the decoder with a sigmoid instead of an identity.
    pub add_sigmoid: bool,
}

#[derive(Debug, Clone)]
pub struct PretrainOutcome {
    pub autoencoder: Autoencoder,
    pub checkpoint_path: PathBuf,
    pub best_epoch: usize,
    pub best_loss: f64,
}

struct Fit {
    network: Network,
    epoch: usize,
    loss: f64,
}

fn through(prefix: &[Layer], input: &[f64]) -> Vec<f64> {
    let mut current = input.to_vec();
    for layer in prefix {
        current = layer.predict(&current);
    }
    current
}

/// Mean squared reconstruction error of `network` on the codes `prefix`
/// produces for every sample of `loader`.
fn reconstruction_loss(network: &Network, prefix: &[Layer], loader: &DataLoader<'_>) -> Result<f64> {
    let mut total = 0.0;
    let mut count = 0;
    for indices in loader.sequential_plan() {
        let batch = loader.load(&indices)?;
        total += batch
            .par_iter()
            .map(|sample| {
                let x = through(prefix, &sample.input);
                LossType::Mse.loss(&network.predict(&x), Target::Values(&x))
            })
            .sum::<f64>();
        count += batch.len();
    }
    Ok(if count == 0 { 0.0 } else { total / count as f64 })
}

/// Trains `network` to reproduce its input and returns its best validation
/// state.
fn fit_reconstruction<R: Rng + ?Sized>(
    network: &mut Network,
    prefix: &[Layer],
    train_loader: &DataLoader<'_>,
    valid_loader: &DataLoader<'_>,
    options: &PretrainOptions,
    rng: &mut R,
) -> Result<Fit> {
    let mut optimizer = Optimizer::new(OptimizerConfig::new(options.optimizer, options.learning_rate), network);
    let mut best = Fit { network: network.clone(), epoch: 0, loss: f64::INFINITY };

    for epoch in 0..options.epochs {
        for indices in train_loader.epoch_plan(rng) {
            let batch = train_loader.load(&indices)?;
            let mut accumulated = network.zero_gradients();
            for sample in &batch {
                let x = through(prefix, &sample.input);
                let output = network.forward(x.clone());
                let grads = network.backward(LossType::Mse.derivative(&output, Target::Values(&x)));
                for (acc, grad) in accumulated.iter_mut().zip(&grads) {
                    acc.add_assign(grad);
                }
            }
            apply_accumulated(network, &mut optimizer, &mut accumulated, batch.len());
        }

        let loss = reconstruction_loss(network, prefix, valid_loader)?;
        debug!("pretraining epoch {}: reconstruction loss {:.6}", epoch, loss);
        if loss < best.loss {
            best = Fit { network: network.clone(), epoch, loss };
        }
    }
    Ok(best)
}

/// Pretrains the feature stages of `network` and saves the result to
/// `<output_dir>/pretraining/best_model_dir/model_best.json`.
pub fn greedy_learning<R: Rng + ?Sized>(
    network: &Network,
    train_loader: &DataLoader<'_>,
    valid_loader: &DataLoader<'_>,
    options: &PretrainOptions,
    output_dir: &Path,
    rng: &mut R,
) -> Result<PretrainOutcome> {
    if options.epochs == 0 {
        return Err(Error::Config("transfer_learning_epochs must be at least 1 to pretrain an autoencoder".into()));
    }
    let template = Autoencoder::from_network(network, options.add_sigmoid, rng);
    let n = template.encoder.len();
    if n == 0 {
        return Err(Error::Config("the architecture has no feature stage to pretrain".into()));
    }

    let mut encoder: Vec<Layer> = Vec::with_capacity(n);
    // decoders[i] reconstructs the input of stage i
    let mut decoders: Vec<Layer> = Vec::with_capacity(n);
    for i in 0..n {
        let mut pair = Network::new(vec![template.encoder[i].clone(), template.decoder[n - 1 - i].clone()], 1);
        let fit = fit_reconstruction(&mut pair, &encoder, train_loader, valid_loader, options, rng)?;
        info!("stage {} pretrained: best reconstruction loss {:.6} at epoch {}", i, fit.loss, fit.epoch);
        let mut layers = fit.network.layers;
        decoders.push(layers.remove(1));
        encoder.push(layers.remove(0));
    }

    decoders.reverse();
    let mut stack = Autoencoder { encoder, decoder: decoders }.to_network();
    let fit = fit_reconstruction(&mut stack, &[], train_loader, valid_loader, options, rng)?;
    info!("autoencoder fine-tuned: best reconstruction loss {:.6} at epoch {}", fit.loss, fit.epoch);
    if !fit.loss.is_finite() {
        return Err(Error::Transfer(format!("reconstruction loss {} is not finite", fit.loss)));
    }

    let autoencoder = Autoencoder::from_stack(fit.network);
    let checkpoint_path = AutoencoderCheckpoint::new(fit.epoch, fit.loss, autoencoder.clone())
        .save(pretraining_dir(output_dir).join("best_model_dir"))?;
    Ok(PretrainOutcome { autoencoder, checkpoint_path, best_epoch: fit.epoch, best_loss: fit.loss })
}
