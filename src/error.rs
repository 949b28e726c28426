//! Error types shared by the library, the CLI and the Python layer.

use thiserror::Error;

/// Main error type for the crate.
///
/// Configuration problems (`UnknownNullModel`, `InvalidParameter`,
/// `MissingTaxa`, `InvalidMatrix`, `DimensionMismatch`) are raised before any
/// randomization work starts. Numeric degeneracies are never errors: they show
/// up as NA cells in the results.
#[derive(Error, Debug)]
pub enum SesError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Tree error: {0}")]
    Tree(String),

    #[error("Unknown null model '{0}' (expected one of: taxa.labels, richness, frequency, sample.pool, phylogeny.pool, independentswap, trialswap)")]
    UnknownNullModel(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{} taxa missing from the distance matrix: {}", .0.len(), .0.join(", "))]
    MissingTaxa(Vec<String>),

    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<phylotree::tree::TreeError> for SesError {
    fn from(e: phylotree::tree::TreeError) -> Self {
        SesError::Tree(e.to_string())
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, SesError>;
