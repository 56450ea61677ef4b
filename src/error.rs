//! Error types shared by every layer of the engine.
//!
//! Three kinds matter to callers:
//!
//! - [`KnowledgeError::Validation`]: misuse detected up front, such as bad
//!   chunker settings or an oversized file. Never retried.
//! - [`KnowledgeError::Index`]: a hard indexing failure tied to a path.
//!   Batch operations record these per file instead of returning them.
//! - [`KnowledgeError::Search`]: anything that stops a query from producing
//!   results, including an unknown reference chunk.
//!
//! The remaining variants are lower-level causes that the indexer and search
//! layers wrap into one of the three above before handing them to callers.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("failed to index {}: {message}", path.display())]
    Index { path: PathBuf, message: String },
    #[error("search failed: {0}")]
    Search(String),
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("text extraction failed: {0}")]
    Extract(String),
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

impl KnowledgeError {
    /// Attach a path to an arbitrary failure, producing an `Index` error.
    pub fn index(path: &Path, cause: impl std::fmt::Display) -> Self {
        KnowledgeError::Index {
            path: path.to_path_buf(),
            message: cause.to_string(),
        }
    }

    /// Wrap any failure as a `Search` error. `Search` errors pass through.
    pub fn search(cause: KnowledgeError) -> Self {
        match cause {
            KnowledgeError::Search(_) => cause,
            other => KnowledgeError::Search(other.to_string()),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, KnowledgeError::Validation(_))
    }
}
