//! Error types for command resolution.

use parley_core::error::ParleyError;

/// Errors from the correlator and the LLM client.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("correlator lock poisoned: {0}")]
    Poisoned(String),
    #[error("LLM request failed: {0}")]
    Llm(String),
    #[error("LLM returned no choices")]
    EmptyCompletion,
    #[error(transparent)]
    Core(#[from] ParleyError),
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::Llm(err.to_string())
    }
}
