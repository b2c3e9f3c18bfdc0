use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::layers::dense::LayerGradient;
use crate::math::matrix::Matrix;
use crate::network::network::Network;
use crate::optim::{adadelta::Adadelta, adam::Adam, sgd::Sgd};

/// Optimizer choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[value(name = "SGD", alias = "sgd")]
    Sgd,
    #[value(name = "Adadelta", alias = "adadelta")]
    Adadelta,
    #[value(name = "Adam", alias = "adam")]
    Adam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    /// Learning rate of the feature stages; `None` means `learning_rate`.
    pub features_learning_rate: Option<f64>,
    pub momentum: f64,
    pub weight_decay: f64,
}

impl OptimizerConfig {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> OptimizerConfig {
        OptimizerConfig {
            kind,
            learning_rate,
            features_learning_rate: None,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Sgd(Sgd),
    Adadelta(Adadelta),
    Adam(Adam),
}

impl Rule {
    fn new(kind: OptimizerKind, momentum: f64, shape_of: &Matrix) -> Rule {
        match kind {
            OptimizerKind::Sgd => Rule::Sgd(Sgd::new(momentum)),
            OptimizerKind::Adadelta => Rule::Adadelta(Adadelta::new(shape_of)),
            OptimizerKind::Adam => Rule::Adam(Adam::new(shape_of)),
        }
    }

    fn update(&mut self, param: &mut Matrix, grad: &Matrix, lr: f64) {
        match self {
            Rule::Sgd(rule) => rule.update(param, grad, lr),
            Rule::Adadelta(rule) => rule.update(param, grad, lr),
            Rule::Adam(rule) => rule.update(param, grad, lr),
        }
    }
}

/// Stateful optimizer bound to one network's parameter shapes.
///
/// Two parameter groups: the feature stages (`features_learning_rate`) and
/// the classifier head (`learning_rate`).
#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
    n_features: usize,
    rules: Vec<(Rule, Rule)>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig, network: &Network) -> Optimizer {
        let rules = network.layers.iter()
            .map(|layer| (
                Rule::new(config.kind, config.momentum, &layer.weights),
                Rule::new(config.kind, config.momentum, &layer.biases),
            ))
            .collect();
        Optimizer { config, n_features: network.n_features, rules }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn learning_rate_for(&self, layer_index: usize) -> f64 {
        if layer_index < self.n_features {
            self.config.features_learning_rate.unwrap_or(self.config.learning_rate)
        } else {
            self.config.learning_rate
        }
    }

    /// Applies one update with already-averaged gradients.
    pub fn step(&mut self, network: &mut Network, grads: &[LayerGradient]) {
        assert_eq!(grads.len(), network.layers.len(), "one gradient per layer");
        let wd = self.config.weight_decay;
        for (i, (layer, grad)) in network.layers.iter_mut().zip(grads.iter()).enumerate() {
            let lr = self.learning_rate_for(i);
            let (w_rule, b_rule) = &mut self.rules[i];
            let w_grad = with_decay(&grad.weights, &layer.weights, wd);
            let b_grad = with_decay(&grad.biases, &layer.biases, wd);
            w_rule.update(&mut layer.weights, &w_grad, lr);
            b_rule.update(&mut layer.biases, &b_grad, lr);
        }
    }
}

/// L2 weight decay folded into the gradient: g + λ·p
fn with_decay(grad: &Matrix, param: &Matrix, weight_decay: f64) -> Matrix {
    if weight_decay == 0.0 {
        grad.clone()
    } else {
        grad.zip_map(param, |g, p| g + weight_decay * p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::network::spec::{LayerSpec, NetworkSpec};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn net() -> Network {
        NetworkSpec {
            input_size: 3,
            stages: vec![LayerSpec::new(2, ActivationFunction::ReLU)],
            classifier: vec![LayerSpec::new(2, ActivationFunction::Softmax)],
        }
        .build(&mut StdRng::seed_from_u64(5))
    }

    #[test]
    fn feature_stages_use_their_own_learning_rate() {
        let network = net();
        let mut config = OptimizerConfig::new(OptimizerKind::Sgd, 0.1);
        config.features_learning_rate = Some(0.001);
        let opt = Optimizer::new(config, &network);
        assert_eq!(opt.learning_rate_for(0), 0.001);
        assert_eq!(opt.learning_rate_for(1), 0.1);
    }

    #[test]
    fn frozen_stage_stays_put_with_zero_feature_rate() {
        let mut network = net();
        let before = network.layers[0].weights.clone();
        let mut config = OptimizerConfig::new(OptimizerKind::Adam, 0.01);
        config.features_learning_rate = Some(0.0);
        let mut opt = Optimizer::new(config, &network);

        network.forward(vec![1.0, 0.5, -0.5]);
        let grads = network.backward(vec![0.3, -0.3]);
        opt.step(&mut network, &grads);

        assert_eq!(network.layers[0].weights, before);
    }
}
