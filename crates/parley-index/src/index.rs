//! The `CommandIndex` seam between Parley and the search service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_core::config::SearchMode;
use parley_core::types::{CommandSource, CorrectionCandidate};

use crate::error::IndexError;

/// One ranked query against the index.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub mode: SearchMode,
    /// Maximum typos per token for lexical matching.
    pub num_typos: u32,
    pub num_results: u32,
    /// Embedding field used by semantic and hybrid queries.
    pub semantic_model: String,
}

impl SearchQuery {
    pub fn exact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: SearchMode::Exact,
            num_typos: 0,
            num_results: 1,
            semantic_model: String::new(),
        }
    }
}

/// A command as stored in the index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandDocument {
    pub command: String,
    pub rank: f64,
    pub accuracy: f64,
    pub source: CommandSource,
    pub timestamp: i64,
}

impl CommandDocument {
    /// A new document stamped with the current time.
    pub fn new(command: impl Into<String>, rank: f64, source: CommandSource) -> Self {
        Self {
            command: command.into(),
            rank,
            accuracy: 1.0,
            source,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Ranked search and insertion over known-good commands.
///
/// Implementations report hits best-first; the match signal of each hit
/// corresponds to the query mode.
#[async_trait]
pub trait CommandIndex: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CorrectionCandidate>, IndexError>;

    async fn insert(&self, document: &CommandDocument) -> Result<(), IndexError>;

    /// Remove a command by document id, returning the deleted command text.
    async fn delete(&self, id: &str) -> Result<String, IndexError>;
}
