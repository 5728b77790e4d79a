//! In-memory `CommandIndex` used as a test double.
//!
//! Lexical scoring approximates the search service: a query token matches a
//! stored token within the allowed typo count (none below 3 characters, one
//! below 6, otherwise `num_typos`). Semantic and hybrid signals are derived
//! from the matched-token ratio unless a scripted response is queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use parley_core::config::SearchMode;
use parley_core::types::{CommandSource, CorrectionCandidate, MatchSignal};

use crate::error::IndexError;
use crate::index::{CommandDocument, CommandIndex, SearchQuery};

#[derive(Clone, Debug)]
struct Stored {
    id: String,
    document: CommandDocument,
}

/// A `CommandIndex` backed by a `Vec` behind a mutex.
#[derive(Default)]
pub struct MemoryIndex {
    commands: Mutex<Vec<Stored>>,
    scripted: Mutex<VecDeque<Vec<CorrectionCandidate>>>,
    unavailable: AtomicBool,
    next_id: AtomicU64,
    searches: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a command directly, returning its document id.
    pub fn add(&self, command: &str, source: CommandSource) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.push(Stored {
            id: id.clone(),
            document: CommandDocument::new(command, 0.9, source),
        });
        id
    }

    /// Queue a fixed response for the next non-exact search.
    pub fn script(&self, hits: Vec<CorrectionCandidate>) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(hits);
    }

    /// Make every call fail as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of search calls served (including failed ones).
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn commands(&self) -> Vec<CommandDocument> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.document.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(IndexError::Unreachable("memory index marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CommandIndex for MemoryIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CorrectionCandidate>, IndexError> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        if query.mode != SearchMode::Exact {
            let scripted = self
                .scripted
                .lock()
                .map_err(|e| IndexError::Unreachable(format!("lock poisoned: {}", e)))?
                .pop_front();
            if let Some(hits) = scripted {
                return Ok(hits);
            }
        }

        let commands = self
            .commands
            .lock()
            .map_err(|e| IndexError::Unreachable(format!("lock poisoned: {}", e)))?;

        if query.mode == SearchMode::Exact {
            return Ok(commands
                .iter()
                .filter(|s| s.document.command == query.text)
                .take(1)
                .map(|s| candidate(s, MatchSignal::TokensMatched(token_count(&query.text))))
                .collect());
        }

        let query_tokens = tokens(&query.text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u32, &Stored)> = commands
            .iter()
            .map(|s| (tokens_matched(&query_tokens, &s.document.command, query.num_typos), s))
            .filter(|(matched, _)| *matched > 0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0).then(
                b.1.document
                    .rank
                    .partial_cmp(&a.1.document.rank)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let total = query_tokens.len() as f64;
        Ok(scored
            .into_iter()
            .take(query.num_results.max(1) as usize)
            .map(|(matched, s)| {
                let ratio = matched as f64 / total;
                let signal = match query.mode {
                    SearchMode::Semantic => MatchSignal::VectorDistance(1.0 - ratio),
                    SearchMode::Hybrid => MatchSignal::HybridScore(ratio),
                    _ => MatchSignal::TokensMatched(matched),
                };
                candidate(s, signal)
            })
            .collect())
    }

    async fn insert(&self, document: &CommandDocument) -> Result<(), IndexError> {
        self.check_available()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.commands
            .lock()
            .map_err(|e| IndexError::Unreachable(format!("lock poisoned: {}", e)))?
            .push(Stored {
                id,
                document: document.clone(),
            });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<String, IndexError> {
        self.check_available()?;
        let mut commands = self
            .commands
            .lock()
            .map_err(|e| IndexError::Unreachable(format!("lock poisoned: {}", e)))?;
        let pos = commands
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;
        Ok(commands.remove(pos).document.command)
    }
}

fn candidate(stored: &Stored, signal: MatchSignal) -> CorrectionCandidate {
    CorrectionCandidate {
        id: Some(stored.id.clone()),
        command: stored.document.command.clone(),
        rank: stored.document.rank,
        accuracy: stored.document.accuracy,
        source: stored.document.source,
        timestamp_seconds: stored.document.timestamp,
        signal,
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '-')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn token_count(text: &str) -> u32 {
    tokens(text).len() as u32
}

fn allowed_typos(token: &str, num_typos: u32) -> usize {
    match token.chars().count() {
        0..=2 => 0,
        3..=5 => num_typos.min(1) as usize,
        _ => num_typos as usize,
    }
}

fn tokens_matched(query_tokens: &[String], command: &str, num_typos: u32) -> u32 {
    let doc_tokens = tokens(command);
    query_tokens
        .iter()
        .filter(|q| {
            let allowed = allowed_typos(q, num_typos);
            doc_tokens.iter().any(|d| levenshtein(q, d) <= allowed)
        })
        .count() as u32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_query(text: &str) -> SearchQuery {
        SearchQuery {
            text: text.to_string(),
            mode: SearchMode::Token,
            num_typos: 2,
            num_results: 1,
            semantic_model: String::new(),
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("tern", "turn"), 1);
        assert_eq!(levenshtein("ktchen", "kitchen"), 1);
        assert_eq!(levenshtein("on", "off"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_short_tokens_must_match_exactly() {
        let q = tokens("on");
        assert_eq!(tokens_matched(&q, "turn of the light", 2), 0);
        assert_eq!(tokens_matched(&q, "turn on the light", 2), 1);
    }

    #[tokio::test]
    async fn test_exact_search() {
        let index = MemoryIndex::new();
        index.add("turn on light", CommandSource::Manual);

        let hits = index.search(&SearchQuery::exact("turn on light")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].command, "turn on light");

        let hits = index.search(&SearchQuery::exact("turn on lights")).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_token_search_ranks_best_first() {
        let index = MemoryIndex::new();
        index.add("turn off kitchen light", CommandSource::Manual);
        index.add("turn on kitchen light", CommandSource::Manual);

        let hits = index.search(&token_query("tern on ktchen light")).await.unwrap();
        assert_eq!(hits[0].command, "turn on kitchen light");
        assert_eq!(hits[0].signal, MatchSignal::TokensMatched(4));
    }

    #[tokio::test]
    async fn test_scripted_response_consumed_once() {
        let index = MemoryIndex::new();
        index.script(vec![CorrectionCandidate::new(
            "scripted",
            MatchSignal::HybridScore(0.9),
        )]);

        let first = index.search(&token_query("anything")).await.unwrap();
        assert_eq!(first[0].command, "scripted");
        let second = index.search(&token_query("anything")).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(index.searches(), 2);
    }

    #[tokio::test]
    async fn test_insert_and_delete() {
        let index = MemoryIndex::new();
        let id = index.add("turn on fan", CommandSource::HaEntities);
        index
            .insert(&CommandDocument::new("turn off fan", 0.5, CommandSource::HaEntities))
            .await
            .unwrap();
        assert_eq!(index.len(), 2);

        assert_eq!(index.delete(&id).await.unwrap(), "turn on fan");
        assert_eq!(index.len(), 1);
        assert!(matches!(
            index.delete(&id).await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let index = MemoryIndex::new();
        index.set_unavailable(true);
        assert!(index.search(&token_query("x")).await.is_err());
        assert!(index
            .insert(&CommandDocument::new("x", 0.9, CommandSource::Manual))
            .await
            .is_err());
        assert!(index.is_empty());
    }
}
