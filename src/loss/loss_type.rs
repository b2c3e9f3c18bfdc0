use serde::{Serialize, Deserialize};

use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::loss::mse::MseLoss;

/// Which loss a training run minimises.
///
/// - `CrossEntropy`: classification; pair with a Softmax output.
/// - `Mse`: reconstruction; the target is the input itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Mse,
    CrossEntropy,
}

/// Target of one sample: a class index or a reconstruction vector.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Class(usize),
    Values(&'a [f64]),
}

impl LossType {
    pub fn loss(self, predicted: &[f64], target: Target<'_>) -> f64 {
        match (self, target) {
            (LossType::CrossEntropy, Target::Class(c)) => CrossEntropyLoss::loss(predicted, c),
            (LossType::Mse, Target::Values(v)) => MseLoss::loss(predicted, v),
            (LossType::Mse, Target::Class(c)) => MseLoss::loss(predicted, &one_hot(c, predicted.len())),
            (LossType::CrossEntropy, Target::Values(v)) => {
                CrossEntropyLoss::loss(predicted, argmax(v))
            }
        }
    }

    pub fn derivative(self, predicted: &[f64], target: Target<'_>) -> Vec<f64> {
        match (self, target) {
            (LossType::CrossEntropy, Target::Class(c)) => CrossEntropyLoss::derivative(predicted, c),
            (LossType::Mse, Target::Values(v)) => MseLoss::derivative(predicted, v),
            (LossType::Mse, Target::Class(c)) => {
                MseLoss::derivative(predicted, &one_hot(c, predicted.len()))
            }
            (LossType::CrossEntropy, Target::Values(v)) => {
                CrossEntropyLoss::derivative(predicted, argmax(v))
            }
        }
    }
}

fn one_hot(class: usize, len: usize) -> Vec<f64> {
    let mut v = vec![0.0; len];
    if class < len {
        v[class] = 1.0;
    }
    v
}

/// Index of the maximum element, first one on ties; 0 for an empty slice.
pub fn argmax(v: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_the_first_maximum() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
