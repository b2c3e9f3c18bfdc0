pub mod results;
pub mod soft_vote;

pub use results::{hard_voting_to_tsvs, read_patch_metrics, read_patch_results, EvalMode, PatchMetrics, PatchResult};
pub use soft_vote::{multi_cnn_soft_majority_voting, soft_majority_vote, ClassifierVotes, SubjectMetrics, SubjectVote, VoteSummary};
