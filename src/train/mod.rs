pub mod checkpoint;
pub mod evaluate;
pub mod history;
pub mod orchestrator;

pub use checkpoint::{load_model, Checkpoint, Selection, CHECKPOINT_FILE};
pub use evaluate::{test, EvalReport, Prediction};
pub use history::{HistoryLog, HistoryRow};
pub use orchestrator::{
    BestTracker, CheckpointSink, DirectorySink, EarlyStopping, Improvements, Orchestrator, RunState,
    TrainOptions, TrainOutcome, Trainer, TrainingEvaluation,
};
