use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy of the retrieval engine.
///
/// Build failures never replace a published index; search failures fail the
/// whole batch rather than returning fewer result lists than queries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("Query encoding failed: {0}")]
    QueryEncoding(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Malformed embedding: {0}")]
    MalformedEmbedding(String),

    #[error("Duplicate corpus filename: {0}")]
    DuplicateFilename(String),

    #[error("No index has been published yet")]
    NotReady,

    #[error("Search cancelled")]
    Cancelled,

    #[error("Search timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
