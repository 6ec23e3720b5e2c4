use thiserror::Error;

use crate::{GridShape, StreamKey};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Price window is empty")]
    EmptyWindow,

    #[error("Price window length {got} doesn't match grid width {expected}")]
    WindowLengthMismatch { expected: usize, got: usize },

    #[error("Price window contains a non-finite value at index {index}")]
    NonFiniteValue { index: usize },

    #[error("Invalid grid shape {0}")]
    InvalidGrid(GridShape),

    #[error("Grid shape mismatch: expected {expected}, got {got}")]
    GridShapeMismatch { expected: GridShape, got: GridShape },

    #[error("Expected {expected} predicate accuracies, got {got}")]
    InvalidPredicates { expected: usize, got: usize },

    #[error("Vector length mismatch: {left} vs {right}")]
    VectorLengthMismatch { left: usize, right: usize },

    #[error("Malformed template {id}: {reason}")]
    MalformedTemplate { id: i64, reason: String },

    #[error("Pattern source error: {0}")]
    PatternSource(String),

    #[error("Stream {0} is not monitored")]
    NotMonitored(StreamKey),

    #[error("Monitor is stopped")]
    MonitorStopped,

    #[error("Observer error: {0}")]
    Observer(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn malformed(id: i64, reason: impl Into<String>) -> Self {
        Error::MalformedTemplate {
            id,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
