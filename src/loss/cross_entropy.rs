/// Categorical cross-entropy over a Softmax output, with integer targets.
pub struct CrossEntropyLoss;

/// Keeps log() finite.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// L = -log(p[target])
    pub fn loss(predicted: &[f64], target: usize) -> f64 {
        let p = predicted.get(target).copied().unwrap_or(0.0);
        -(p + EPS).ln()
    }

    /// Combined Softmax + cross-entropy gradient w.r.t. the logits:
    /// p - onehot(target).
    pub fn derivative(predicted: &[f64], target: usize) -> Vec<f64> {
        predicted.iter().enumerate()
            .map(|(i, &p)| if i == target { p - 1.0 } else { p })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_correct_prediction_has_small_loss() {
        assert!(CrossEntropyLoss::loss(&[0.99, 0.01], 0) < 0.02);
        assert!(CrossEntropyLoss::loss(&[0.01, 0.99], 0) > 4.0);
    }

    #[test]
    fn gradient_subtracts_one_at_target() {
        let g = CrossEntropyLoss::derivative(&[0.7, 0.3], 1);
        assert!((g[0] - 0.7).abs() < 1e-12);
        assert!((g[1] + 0.7).abs() < 1e-12);
    }
}
