use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::loader::DataLoader;
use crate::error::Result;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::loss::loss_type::argmax;
use crate::network::network::Network;

/// Output of the network for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub participant_id: String,
    pub session_id: String,
    pub y: usize,
    pub y_hat: usize,
    pub probabilities: Vec<f64>,
}

impl Prediction {
    /// Probability the network gave to its own answer.
    pub fn probability(&self) -> f64 {
        self.probabilities.get(self.y_hat).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    /// Mean cross-entropy.
    pub loss: f64,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub predictions: Vec<Prediction>,
}

/// Forward-only pass over every batch of `loader`, in dataset order.
///
/// Predictions within a batch run on the global rayon pool.
pub fn test(network: &Network, loader: &DataLoader<'_>) -> Result<EvalReport> {
    let mut predictions = Vec::with_capacity(loader.dataset().len());
    let mut total_loss = 0.0;

    for indices in loader.sequential_plan() {
        let batch = loader.load(&indices)?;
        let outputs: Vec<Vec<f64>> = batch.par_iter().map(|s| network.predict(&s.input)).collect();
        for (sample, probabilities) in batch.into_iter().zip(outputs) {
            total_loss += CrossEntropyLoss::loss(&probabilities, sample.label);
            predictions.push(Prediction {
                participant_id: sample.participant_id,
                session_id: sample.session_id,
                y: sample.label,
                y_hat: argmax(&probabilities),
                probabilities,
            });
        }
    }

    let y: Vec<usize> = predictions.iter().map(|p| p.y).collect();
    let y_hat: Vec<usize> = predictions.iter().map(|p| p.y_hat).collect();
    let loss = if predictions.is_empty() { 0.0 } else { total_loss / predictions.len() as f64 };
    Ok(EvalReport {
        loss,
        accuracy: accuracy(&y, &y_hat),
        balanced_accuracy: balanced_accuracy(&y, &y_hat),
        predictions,
    })
}

/// Fraction of matching labels; 0 for empty input.
pub fn accuracy(y: &[usize], y_hat: &[usize]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = y.iter().zip(y_hat).filter(|(a, b)| a == b).count();
    correct as f64 / y.len() as f64
}

/// Mean per-class recall over the classes present in `y`.
pub fn balanced_accuracy(y: &[usize], y_hat: &[usize]) -> f64 {
    let mut per_class: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
    for (&truth, &guess) in y.iter().zip(y_hat) {
        let entry = per_class.entry(truth).or_default();
        entry.1 += 1;
        if truth == guess {
            entry.0 += 1;
        }
    }
    if per_class.is_empty() {
        return 0.0;
    }
    let sum: f64 = per_class.values().map(|&(hit, n)| hit as f64 / n as f64).sum();
    sum / per_class.len() as f64
}
