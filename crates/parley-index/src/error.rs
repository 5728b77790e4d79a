//! Error types for the correction index.

use parley_core::error::ParleyError;

/// Errors from the search service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("search service unreachable: {0}")]
    Unreachable(String),
    #[error("search service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected search response: {0}")]
    Decode(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Core(#[from] ParleyError),
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IndexError::Decode(err.to_string())
        } else {
            IndexError::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Decode(err.to_string())
    }
}

impl From<IndexError> for ParleyError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Core(inner) => inner,
            other => ParleyError::Index(other.to_string()),
        }
    }
}
