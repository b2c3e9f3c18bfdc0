use std::collections::HashMap;

use clap::ValueEnum;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How training indices are drawn each epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Uniform random permutation.
    Random,
    /// Draws with replacement, each class equally likely overall.
    Weighted,
}

impl SamplerKind {
    /// One epoch worth of sample indices for a dataset with these labels.
    pub fn sample<R: Rng + ?Sized>(self, labels: &[usize], rng: &mut R) -> Vec<usize> {
        match self {
            SamplerKind::Random => {
                let mut indices: Vec<usize> = (0..labels.len()).collect();
                indices.shuffle(rng);
                indices
            }
            SamplerKind::Weighted => weighted(labels, rng),
        }
    }
}

fn weighted<R: Rng + ?Sized>(labels: &[usize], rng: &mut R) -> Vec<usize> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &l in labels {
        *counts.entry(l).or_default() += 1;
    }
    let weights: Vec<f64> = labels.iter().map(|l| 1.0 / counts[l] as f64).collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => (0..labels.len()).map(|_| dist.sample(rng)).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn random_is_a_permutation() {
        let labels = vec![0, 1, 1, 0, 1];
        let mut idx = SamplerKind::Random.sample(&labels, &mut StdRng::seed_from_u64(1));
        idx.sort();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn weighted_balances_a_skewed_table() {
        // 1 positive, 9 negatives
        let mut labels = vec![0; 9];
        labels.push(1);
        let mut rng = StdRng::seed_from_u64(4);
        let mut positives = 0;
        let mut total = 0;
        for _ in 0..400 {
            let draw = SamplerKind::Weighted.sample(&labels, &mut rng);
            total += draw.len();
            positives += draw.iter().filter(|&&i| labels[i] == 1).count();
        }
        let share = positives as f64 / total as f64;
        assert!((share - 0.5).abs() < 0.05, "share = {}", share);
    }

    #[test]
    fn weighted_on_empty_labels_is_empty() {
        assert!(SamplerKind::Weighted.sample(&[], &mut StdRng::seed_from_u64(0)).is_empty());
    }
}
