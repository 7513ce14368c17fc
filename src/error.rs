//! Error types for the decoding core.

use thiserror::Error;

use crate::vision::task::TaskType;

/// Result type alias using the crate's [`DecodeError`].
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors surfaced by generation and post-processing.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),

    #[error("logits shape mismatch: expected {expected_beams} beams, got {got:?}")]
    LogitsShape {
        expected_beams: usize,
        got: Vec<usize>,
    },

    #[error("logits rows are empty (vocabulary size 0)")]
    EmptyVocabulary,

    #[error("task {0:?} has no coordinate shape")]
    UnsupportedTask(TaskType),

    #[error("unknown task {0:?}")]
    UnknownTask(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("logits trace error: {0}")]
    Trace(String),

    #[error("generation cancelled before step {step}")]
    Cancelled { step: usize },

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
