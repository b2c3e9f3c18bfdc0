use thiserror::Error;

/// Every failure a training or inference run can hit. All of them are fatal
/// to the current run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("The model wanted {0} has not been implemented")]
    UnknownModel(String),

    #[error("Diagnosis labels must be given to train the autoencoder")]
    MissingTransferDiagnoses,

    #[error("Evaluation steps {evaluation_steps} must be a multiple of accumulation steps {accumulation_steps}")]
    EvaluationSteps {
        evaluation_steps: usize,
        accumulation_steps: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unknown arguments: {0:?}")]
    UnknownArguments(Vec<String>),

    #[error("Transfer learning failed: {0}")]
    Transfer(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
