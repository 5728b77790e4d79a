//! Correction search: one query, one top hit, one threshold check.
//!
//! Any failure of the underlying service is reported as a non-match. Callers
//! of [`CorrectionSearch::search`] never see an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_core::config::{CorrectionConfig, SearchMode};
use parley_core::types::{CorrectionCandidate, MatchSignal};

use crate::index::{CommandIndex, SearchQuery};

/// Success thresholds per search mode. All bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Minimum matched tokens (token mode).
    pub token_match: u32,
    /// Maximum vector distance (semantic mode).
    pub vector_distance: f64,
    /// Minimum rank-fusion score (hybrid mode).
    pub hybrid_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            token_match: 3,
            vector_distance: 0.29,
            hybrid_score: 0.85,
        }
    }
}

impl Thresholds {
    /// Whether a top hit found in `mode` counts as a correction.
    pub fn accepts(&self, mode: SearchMode, signal: MatchSignal) -> bool {
        match (mode, signal) {
            (SearchMode::Exact, _) => true,
            (SearchMode::Token, MatchSignal::TokensMatched(n)) => n >= self.token_match,
            (SearchMode::Semantic, MatchSignal::VectorDistance(d)) => d <= self.vector_distance,
            (SearchMode::Hybrid, MatchSignal::HybridScore(s)) => s >= self.hybrid_score,
            // A signal from another mode never satisfies this one.
            _ => false,
        }
    }
}

/// Query parameters taken from configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchSettings {
    pub mode: SearchMode,
    pub num_typos: u32,
    pub num_results: u32,
    pub semantic_model: String,
    pub thresholds: Thresholds,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from(&CorrectionConfig::default())
    }
}

impl From<&CorrectionConfig> for SearchSettings {
    fn from(config: &CorrectionConfig) -> Self {
        Self {
            mode: config.mode,
            num_typos: config.search_distance,
            num_results: config.num_results.max(1),
            semantic_model: config.semantic_model.clone(),
            thresholds: Thresholds {
                token_match: config.token_match_threshold,
                vector_distance: config.vector_distance_threshold,
                hybrid_score: config.hybrid_score_threshold,
            },
        }
    }
}

/// Result of a correction search.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchOutcome {
    pub matched: bool,
    /// The corrected command on a match, otherwise the input text.
    pub command: String,
    /// The top hit, whether or not it passed the threshold.
    pub top_hit: Option<CorrectionCandidate>,
}

impl SearchOutcome {
    fn miss(text: &str, top_hit: Option<CorrectionCandidate>) -> Self {
        Self {
            matched: false,
            command: text.to_string(),
            top_hit,
        }
    }
}

/// Stateless search client over a shared [`CommandIndex`].
#[derive(Clone)]
pub struct CorrectionSearch {
    index: Arc<dyn CommandIndex>,
    settings: SearchSettings,
}

impl CorrectionSearch {
    pub fn new(index: Arc<dyn CommandIndex>, settings: SearchSettings) -> Self {
        Self { index, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<dyn CommandIndex> {
        &self.index
    }

    /// Search in the configured mode.
    pub async fn search(&self, text: &str) -> SearchOutcome {
        self.search_with(text, self.settings.mode).await
    }

    /// True when the index holds exactly this command.
    pub async fn exists(&self, text: &str) -> bool {
        self.search_with(text, SearchMode::Exact).await.matched
    }

    /// Search in an explicit mode, scoring the top hit against the thresholds.
    pub async fn search_with(&self, text: &str, mode: SearchMode) -> SearchOutcome {
        let query = self.query(text, mode);
        debug!(
            command = %text,
            %mode,
            num_typos = query.num_typos,
            "Searching correction index"
        );

        let hits = match self.index.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(command = %text, error = %e, "Correction search failed");
                return SearchOutcome::miss(text, None);
            }
        };

        let Some(top) = hits.into_iter().next() else {
            info!(command = %text, %mode, "Command not found in correction index");
            return SearchOutcome::miss(text, None);
        };

        if mode == SearchMode::Exact && top.command.is_empty() {
            return SearchOutcome::miss(text, Some(top));
        }

        if self.settings.thresholds.accepts(mode, top.signal) {
            info!(
                command = %text,
                corrected = %top.command,
                signal = ?top.signal,
                source = %top.source,
                "Correction search passed threshold"
            );
            SearchOutcome {
                matched: true,
                command: top.command.clone(),
                top_hit: Some(top),
            }
        } else {
            info!(
                command = %text,
                candidate = %top.command,
                signal = ?top.signal,
                "Correction search did not meet threshold"
            );
            SearchOutcome::miss(text, Some(top))
        }
    }

    fn query(&self, text: &str, mode: SearchMode) -> SearchQuery {
        if mode == SearchMode::Exact {
            return SearchQuery::exact(text);
        }
        SearchQuery {
            text: text.to_string(),
            mode,
            num_typos: self.settings.num_typos,
            num_results: self.settings.num_results,
            semantic_model: self.settings.semantic_model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use parley_core::types::CommandSource;

    fn settings(mode: SearchMode) -> SearchSettings {
        SearchSettings {
            mode,
            ..SearchSettings::default()
        }
    }

    #[test]
    fn test_token_threshold_inclusive() {
        let t = Thresholds::default();
        assert!(t.accepts(SearchMode::Token, MatchSignal::TokensMatched(3)));
        assert!(t.accepts(SearchMode::Token, MatchSignal::TokensMatched(4)));
        assert!(!t.accepts(SearchMode::Token, MatchSignal::TokensMatched(2)));
    }

    #[test]
    fn test_semantic_threshold_inclusive() {
        let t = Thresholds {
            vector_distance: 0.29,
            ..Thresholds::default()
        };
        assert!(t.accepts(SearchMode::Semantic, MatchSignal::VectorDistance(0.29)));
        assert!(t.accepts(SearchMode::Semantic, MatchSignal::VectorDistance(0.1)));
        assert!(!t.accepts(SearchMode::Semantic, MatchSignal::VectorDistance(0.3)));
    }

    #[test]
    fn test_hybrid_threshold_inclusive() {
        let t = Thresholds {
            hybrid_score: 0.85,
            ..Thresholds::default()
        };
        assert!(t.accepts(SearchMode::Hybrid, MatchSignal::HybridScore(0.85)));
        assert!(t.accepts(SearchMode::Hybrid, MatchSignal::HybridScore(1.0)));
        assert!(!t.accepts(SearchMode::Hybrid, MatchSignal::HybridScore(0.84)));
    }

    #[test]
    fn test_mismatched_signal_rejected() {
        let t = Thresholds::default();
        assert!(!t.accepts(SearchMode::Hybrid, MatchSignal::TokensMatched(10)));
        assert!(!t.accepts(SearchMode::Token, MatchSignal::HybridScore(1.0)));
        assert!(t.accepts(SearchMode::Exact, MatchSignal::TokensMatched(0)));
    }

    #[tokio::test]
    async fn test_token_search_corrects_typos() {
        let index = Arc::new(MemoryIndex::new());
        index.add("turn on kitchen light", CommandSource::Manual);
        index.add("turn off kitchen light", CommandSource::Manual);

        let search = CorrectionSearch::new(index, settings(SearchMode::Token));
        let outcome = search.search("tern on ktchen light").await;

        assert!(outcome.matched);
        assert_eq!(outcome.command, "turn on kitchen light");
        assert_eq!(
            outcome.top_hit.map(|h| h.signal),
            Some(MatchSignal::TokensMatched(4))
        );
    }

    #[tokio::test]
    async fn test_below_threshold_returns_input() {
        let index = Arc::new(MemoryIndex::new());
        index.add("turn on kitchen light", CommandSource::Manual);

        let search = CorrectionSearch::new(index, settings(SearchMode::Token));
        let outcome = search.search("play jazz").await;

        assert!(!outcome.matched);
        assert_eq!(outcome.command, "play jazz");
    }

    #[tokio::test]
    async fn test_hybrid_boundary_from_scripted_hit() {
        let index = Arc::new(MemoryIndex::new());
        index.script(vec![CorrectionCandidate::new(
            "turn on the porch light",
            MatchSignal::HybridScore(0.85),
        )]);

        let search = CorrectionSearch::new(index, settings(SearchMode::Hybrid));
        let outcome = search.search("turn on porch").await;
        assert!(outcome.matched);
        assert_eq!(outcome.command, "turn on the porch light");
    }

    #[tokio::test]
    async fn test_semantic_boundary_from_scripted_hit() {
        let index = Arc::new(MemoryIndex::new());
        index.script(vec![CorrectionCandidate::new(
            "lock the front door",
            MatchSignal::VectorDistance(0.29),
        )]);

        let search = CorrectionSearch::new(index, settings(SearchMode::Semantic));
        assert!(search.search("secure the front door").await.matched);
    }

    #[tokio::test]
    async fn test_service_failure_is_non_match() {
        let index = Arc::new(MemoryIndex::new());
        index.add("turn on kitchen light", CommandSource::Manual);
        index.set_unavailable(true);

        let search = CorrectionSearch::new(index, settings(SearchMode::Token));
        let outcome = search.search("turn on kitchen light").await;
        assert!(!outcome.matched);
        assert_eq!(outcome.command, "turn on kitchen light");
        assert!(outcome.top_hit.is_none());
    }

    #[tokio::test]
    async fn test_exists_uses_exact_mode() {
        let index = Arc::new(MemoryIndex::new());
        index.add("turn on kitchen light", CommandSource::Manual);

        let search = CorrectionSearch::new(index, settings(SearchMode::Token));
        assert!(search.exists("turn on kitchen light").await);
        assert!(!search.exists("turn on kitchen").await);
    }
}
