//! Participant-level, diagnosis-stratified k-fold splits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::table::{load_table, SampleRow};
use crate::error::{Error, Result};

/// Training and validation rows of one fold, in input order.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<SampleRow>,
    pub valid: Vec<SampleRow>,
}

/// Assigns each participant to one of `n_splits` folds and returns fold
/// `split` as the validation side.
///
/// All sessions of a participant land on the same side. Participants are
/// dealt round-robin per diagnosis after a seeded shuffle, so every fold sees
/// every class when the class has at least `n_splits` participants.
pub fn split_folds(rows: &[SampleRow], split: usize, n_splits: usize, seed: u64) -> Result<DatasetSplit> {
    if n_splits < 2 {
        return Err(Error::Config(format!("n_splits must be at least 2, got {}", n_splits)));
    }
    if split >= n_splits {
        return Err(Error::Config(format!(
            "split {} is out of range for {} folds",
            split, n_splits
        )));
    }

    // A participant's stratum is the diagnosis of their first row.
    let mut strata: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut assigned = HashMap::new();
    for row in rows {
        if assigned.contains_key(row.participant_id.as_str()) {
            continue;
        }
        assigned.insert(row.participant_id.as_str(), usize::MAX);
        strata.entry(row.diagnosis.as_str()).or_default().insert(row.participant_id.as_str());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for participants in strata.values() {
        let mut ordered: Vec<&str> = participants.iter().copied().collect();
        ordered.shuffle(&mut rng);
        for (i, p) in ordered.into_iter().enumerate() {
            assigned.insert(p, i % n_splits);
        }
    }

    let (valid, train): (Vec<SampleRow>, Vec<SampleRow>) = rows
        .iter()
        .cloned()
        .partition(|row| assigned.get(row.participant_id.as_str()) == Some(&split));

    Ok(DatasetSplit { train, valid })
}

/// Every row of a held-out table whose diagnosis is in `diagnoses`.
pub fn load_test_rows(path: impl AsRef<Path>, diagnoses: &[String]) -> Result<Vec<SampleRow>> {
    load_table(path, diagnoses, false)
}
