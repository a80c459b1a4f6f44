//! Error types shared by the data, training and checkpoint layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while computing validation metrics.
#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("EER needs both classes, got {genuine} genuine and {impostor} impostor scores")]
    EmptyClass { genuine: usize, impostor: usize },

    #[error("{labels} labels but {scores} scores")]
    LengthMismatch { labels: usize, scores: usize },

    #[error("non-finite similarity score at index {0}")]
    NonFiniteScore(usize),
}

/// Failures while reading image data from disk.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Data file not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed data file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while writing or restoring a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No checkpoint found at: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid state encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Corrupt checkpoint: {0}")]
    Corrupt(String),
}

/// Everything that can abort a training attempt.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error(
        "Hyper loss nadir point {eta} does not exceed the worst sample loss {worst}; \
         increase slack or lower the learning rate"
    )]
    NadirViolation { eta: f64, worst: f64 },

    #[error("Loss became non-finite ({0}) at iteration {1}")]
    NonFiniteLoss(f64, usize),

    #[error("The {0} loader produced no batches")]
    EmptyLoader(&'static str),

    #[error("No completed epochs recorded")]
    EmptyHistory,

    #[error("Tensor conversion error: {0}")]
    Tensor(String),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

impl TrainError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
