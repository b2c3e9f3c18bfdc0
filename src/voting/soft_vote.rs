//! Subject-level decisions from a patch-classifier ensemble.
//!
//! Every classifier backs its answer for a subject with its validation
//! confidence times the probability it gave that answer. The label with the
//! largest summed weight wins; equal weights go to the lowest label index.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layout::fold_performance_dir;
use crate::train::evaluate::{accuracy, balanced_accuracy};
use crate::voting::results::{read_patch_metrics, read_patch_results, write_tsv, EvalMode, PatchResult};

/// Predictions of one classifier together with its own validation
/// confidence.
#[derive(Debug, Clone)]
pub struct ClassifierVotes {
    pub patch_index: usize,
    pub confidence: f64,
    pub results: Vec<PatchResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectVote {
    pub participant_id: String,
    pub session_id: String,
    pub y: usize,
    pub y_hat: usize,
    /// Winning label's share of the weight cast for this subject.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetrics {
    pub accuracy: f64,
    pub balanced_accuracy: f64,
}

#[derive(Debug, Clone)]
pub struct VoteSummary {
    pub votes: Vec<SubjectVote>,
    pub metrics: SubjectMetrics,
}

#[derive(Default)]
struct Tally {
    y: usize,
    // label -> (votes, summed weight)
    labels: BTreeMap<usize, (usize, f64)>,
    total_votes: usize,
    total_weight: f64,
}

impl Tally {
    /// Heaviest label and its share of the weight. When nothing carries
    /// weight the plain vote count decides instead.
    fn winner(&self) -> (usize, f64) {
        let weighted = self.total_weight > 0.0;
        let score = |votes: usize, weight: f64| if weighted { weight } else { votes as f64 };
        let mut best: Option<(usize, f64)> = None;
        // ascending labels, so only a strictly larger score replaces the leader
        for (&label, &(votes, weight)) in &self.labels {
            let s = score(votes, weight);
            if best.map_or(true, |(_, top)| s > top) {
                best = Some((label, s));
            }
        }
        match best {
            Some((label, top)) => {
                let total = if weighted { self.total_weight } else { self.total_votes.max(1) as f64 };
                (label, top / total)
            }
            None => (0, 0.0),
        }
    }
}

/// Combines the per-subject votes of every classifier whose confidence
/// reaches `min_confidence`. Output rows are ordered by participant then
/// session.
pub fn soft_majority_vote(classifiers: &[ClassifierVotes], min_confidence: f64) -> Result<Vec<SubjectVote>> {
    let voters: Vec<&ClassifierVotes> = classifiers.iter().filter(|c| c.confidence >= min_confidence).collect();
    if voters.is_empty() {
        return Err(Error::Config(format!(
            "no classifier out of {} reaches the minimum confidence {}",
            classifiers.len(),
            min_confidence
        )));
    }
    let excluded = classifiers.len() - voters.len();
    if excluded > 0 {
        warn!("{} classifiers below confidence {} left out of the vote", excluded, min_confidence);
    }

    let mut tallies: BTreeMap<(&str, &str), Tally> = BTreeMap::new();
    for voter in &voters {
        for row in &voter.results {
            let tally = tallies.entry((row.participant_id.as_str(), row.session_id.as_str())).or_default();
            tally.y = row.y;
            let weight = voter.confidence * row.probability;
            let entry = tally.labels.entry(row.y_hat).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += weight;
            tally.total_votes += 1;
            tally.total_weight += weight;
        }
    }

    Ok(tallies
        .into_iter()
        .map(|((participant_id, session_id), tally)| {
            let (y_hat, confidence) = tally.winner();
            SubjectVote {
                participant_id: participant_id.to_string(),
                session_id: session_id.to_string(),
                y: tally.y,
                y_hat,
                confidence,
            }
        })
        .collect())
}

/// Reads the `mode` results of classifiers `0..num_cnn` of `fold`, weighs
/// each by its validation balanced accuracy and writes the subject-level
/// table and metrics next to the classifier directories.
pub fn multi_cnn_soft_majority_voting(
    output_dir: &Path,
    fold: usize,
    num_cnn: usize,
    mode: EvalMode,
    min_confidence: f64,
) -> Result<VoteSummary> {
    let classifiers = (0..num_cnn)
        .map(|n| {
            Ok(ClassifierVotes {
                patch_index: n,
                confidence: read_patch_metrics(output_dir, fold, n, EvalMode::Valid)?.balanced_accuracy,
                results: read_patch_results(output_dir, fold, n, mode)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let votes = soft_majority_vote(&classifiers, min_confidence)?;
    let y: Vec<usize> = votes.iter().map(|v| v.y).collect();
    let y_hat: Vec<usize> = votes.iter().map(|v| v.y_hat).collect();
    let metrics = SubjectMetrics { accuracy: accuracy(&y, &y_hat), balanced_accuracy: balanced_accuracy(&y, &y_hat) };

    let dir = fold_performance_dir(output_dir, fold);
    write_tsv(&dir.join(format!("{}_subject_level_result-soft_vote.tsv", mode.prefix())), &votes)?;
    write_tsv(&dir.join(format!("{}_subject_level_metrics.tsv", mode.prefix())), &[metrics])?;
    info!(
        "subject-level {} accuracy {:.2}% balanced {:.2}% over {} subjects",
        mode.prefix(),
        metrics.accuracy * 100.0,
        metrics.balanced_accuracy * 100.0,
        votes.len()
    );
    Ok(VoteSummary { votes, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::results::{hard_voting_to_tsvs, PatchMetrics};
    use crate::train::evaluate::Prediction;

    const A: usize = 0;
    const B: usize = 1;

    fn classifier(patch_index: usize, confidence: f64, votes: &[(&str, usize, f64)]) -> ClassifierVotes {
        ClassifierVotes {
            patch_index,
            confidence,
            results: votes
                .iter()
                .map(|&(participant, y_hat, probability)| PatchResult {
                    participant_id: participant.into(),
                    session_id: "ses-M00".into(),
                    y: B,
                    y_hat,
                    probability,
                    patch_index,
                })
                .collect(),
        }
    }

    #[test]
    fn two_sure_weak_voters_outweigh_one_hesitant_strong_one() {
        let classifiers = vec![
            classifier(0, 0.9, &[("sub-01", A, 0.6)]),
            classifier(1, 0.4, &[("sub-01", B, 0.95)]),
            classifier(2, 0.4, &[("sub-01", B, 0.95)]),
        ];
        let votes = soft_majority_vote(&classifiers, 0.0).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].y_hat, B);
        assert!((votes[0].confidence - 0.76 / 1.30).abs() < 1e-12);
    }

    #[test]
    fn one_strong_voter_outweighs_a_weak_majority() {
        let classifiers = vec![
            classifier(0, 0.95, &[("sub-01", A, 0.7)]),
            classifier(1, 0.1, &[("sub-01", B, 0.7)]),
            classifier(2, 0.1, &[("sub-01", B, 0.7)]),
        ];
        let vote = &soft_majority_vote(&classifiers, 0.0).unwrap()[0];
        assert_eq!(vote.y_hat, A);
        assert!((vote.confidence - 0.95 / 1.15).abs() < 1e-12);
        assert!(vote.confidence > 0.5);
    }

    #[test]
    fn equal_weights_go_to_the_lowest_label() {
        let classifiers = vec![
            classifier(0, 0.5, &[("sub-01", B, 0.8)]),
            classifier(1, 0.5, &[("sub-01", A, 0.8)]),
        ];
        let vote = &soft_majority_vote(&classifiers, 0.0).unwrap()[0];
        assert_eq!(vote.y_hat, A);
        assert!((vote.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn weightless_votes_fall_back_to_counting() {
        let classifiers = vec![
            classifier(0, 0.0, &[("sub-01", A, 0.9)]),
            classifier(1, 0.0, &[("sub-01", B, 0.9)]),
            classifier(2, 0.0, &[("sub-01", B, 0.9)]),
        ];
        let vote = &soft_majority_vote(&classifiers, 0.0).unwrap()[0];
        assert_eq!(vote.y_hat, B);
        assert!((vote.confidence - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn weak_classifiers_can_be_left_out() {
        let classifiers = vec![
            classifier(0, 0.9, &[("sub-01", A, 0.6)]),
            classifier(1, 0.4, &[("sub-01", B, 0.95)]),
            classifier(2, 0.4, &[("sub-01", B, 0.95)]),
        ];
        let vote = &soft_majority_vote(&classifiers, 0.5).unwrap()[0];
        assert_eq!(vote.y_hat, A);
        assert!((vote.confidence - 1.0).abs() < 1e-12);

        assert!(matches!(soft_majority_vote(&classifiers, 0.95), Err(Error::Config(_))));
    }

    #[test]
    fn subjects_are_voted_independently() {
        let classifiers = vec![
            classifier(0, 0.8, &[("sub-01", A, 0.7), ("sub-02", B, 0.7)]),
            classifier(1, 0.8, &[("sub-01", A, 0.7), ("sub-02", B, 0.7)]),
            classifier(2, 0.8, &[("sub-01", B, 0.7), ("sub-02", A, 0.7)]),
        ];
        let votes = soft_majority_vote(&classifiers, 0.0).unwrap();
        let decided: Vec<(&str, usize)> = votes.iter().map(|v| (v.participant_id.as_str(), v.y_hat)).collect();
        assert_eq!(decided, vec![("sub-01", A), ("sub-02", B)]);
    }

    #[test]
    fn voting_from_disk_uses_validation_balanced_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path();
        let prediction = |participant: &str, y: usize, y_hat: usize, probabilities: [f64; 2]| Prediction {
            participant_id: participant.into(),
            session_id: "ses-M00".into(),
            y,
            y_hat,
            probabilities: probabilities.to_vec(),
        };
        let even = [0.5, 0.5];

        // cnn-0 is right on validation, cnn-1 and cnn-2 are half right
        hard_voting_to_tsvs(out, 0, EvalMode::Valid, 0, &[prediction("v1", A, A, even), prediction("v2", B, B, even)])
            .unwrap();
        for n in 1..3 {
            hard_voting_to_tsvs(out, 0, EvalMode::Valid, n, &[prediction("v1", A, A, even), prediction("v2", B, A, even)])
                .unwrap();
        }
        assert_eq!(
            read_patch_metrics(out, 0, 1, EvalMode::Valid).unwrap(),
            PatchMetrics { accuracy: 0.5, balanced_accuracy: 0.5 }
        );

        // 1.0 * 0.6 for A against 0.5 * 0.9 twice for B
        hard_voting_to_tsvs(out, 0, EvalMode::Test, 0, &[prediction("t1", B, A, [0.6, 0.4])]).unwrap();
        hard_voting_to_tsvs(out, 0, EvalMode::Test, 1, &[prediction("t1", B, B, [0.1, 0.9])]).unwrap();
        hard_voting_to_tsvs(out, 0, EvalMode::Test, 2, &[prediction("t1", B, B, [0.1, 0.9])]).unwrap();

        let summary = multi_cnn_soft_majority_voting(out, 0, 3, EvalMode::Test, 0.0).unwrap();
        assert_eq!(summary.votes[0].y_hat, B);
        assert!((summary.votes[0].confidence - 0.9 / 1.5).abs() < 1e-9);
        assert_eq!(summary.metrics.accuracy, 1.0);
        assert!(out.join("performances/fold_0/test_subject_level_result-soft_vote.tsv").is_file());
        assert!(out.join("performances/fold_0/test_subject_level_metrics.tsv").is_file());

        // dropping the half-right classifiers leaves cnn-0 alone
        let summary = multi_cnn_soft_majority_voting(out, 0, 3, EvalMode::Test, 0.75).unwrap();
        assert_eq!(summary.votes[0].y_hat, A);
    }
}
