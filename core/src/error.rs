//! Error taxonomy for the discriminative forest embedding pipeline
//!
//! Every fallible operation in the crate returns [`Result`], and every failure
//! is raised at the point of detection. Nothing is retried internally and no
//! partial results are returned. Failures reported by the classifier or the
//! manifold capability travel through the embedder untouched.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use thiserror::Error;

/// Unified error type for sampling, dataset construction, training and embedding
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// A parameter outside its admissible domain (unknown sampling method,
    /// zero estimators, zero components, ...)
    #[error("Invalid argument: {name} - {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Malformed input matrix: ragged rows, non-numeric or non-finite cells,
    /// wrong rank, broken sparse structure
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Column count of the input does not match the fitted model
    #[error("Invalid feature dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Requested capability that the discriminative relabeling invalidates
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Operation invoked before a successful fit
    #[error("Undefined state: {0}")]
    UndefinedState(String),

    /// Failure raised inside the tree-ensemble classifier
    #[error("Classifier failure: {0}")]
    Classifier(String),

    /// Failure raised inside the manifold reducer
    #[error("Manifold reduction failure: {0}")]
    Manifold(String),

    /// Worker pool construction failure
    #[error("Thread pool construction failed: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// JSON encoding or decoding failure for configurations and models
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EmbeddingError {
    /// Shorthand for [`EmbeddingError::InvalidArgument`]
    pub fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EmbeddingError>;
