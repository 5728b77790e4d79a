//! Typesense-backed `CommandIndex`.
//!
//! Two HTTP clients share one endpoint: a fast one for queries and inserts,
//! and a slow one for collection creation, which may download embedding
//! models on first use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use parley_core::config::{IndexConfig, SearchMode};
use parley_core::types::{CommandSource, CorrectionCandidate, MatchSignal};

use crate::error::IndexError;
use crate::index::{CommandDocument, CommandIndex, SearchQuery};

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

/// Embedding fields defined by the collection schema.
const EMBEDDING_MODELS: [&str; 3] = ["all-MiniLM-L12-v2", "multilingual-e5-small", "gte-small"];

pub struct TypesenseIndex {
    base_url: String,
    api_key: String,
    collection: String,
    client: Client,
    slow_client: Client,
}

impl TypesenseIndex {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let slow_client = Client::builder()
            .timeout(Duration::from_secs(config.slow_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            base_url: config.base_url(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            client,
            slow_client,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Create the collection unless it already exists.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .get(self.collection_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status().is_success() {
            info!(collection = %self.collection, "Connected to correction index");
            return Ok(());
        }

        info!(
            collection = %self.collection,
            "Correction collection not found; creating it (this may take a while)"
        );
        let response = self
            .slow_client
            .post(format!("{}/collections", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&collection_schema(&self.collection))
            .send()
            .await?;
        match response.status() {
            // Created concurrently by someone else.
            StatusCode::CONFLICT => Ok(()),
            _ => check(response).await.map(|_| ()),
        }
    }

    /// Drop every stored command and start over with an empty collection.
    pub async fn reset_collection(&self) -> Result<(), IndexError> {
        info!(collection = %self.collection, "Resetting correction collection");
        let response = self
            .slow_client
            .delete(self.collection_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND {
            check(response).await?;
        }
        self.ensure_collection().await
    }

    /// Run a query and return the service's response untouched.
    pub async fn raw_search(&self, query: &SearchQuery) -> Result<Value, IndexError> {
        let response = self
            .client
            .get(format!("{}/documents/search", self.collection_url()))
            .header(API_KEY_HEADER, &self.api_key)
            .query(&search_params(query))
            .send()
            .await?;
        Ok(check(response).await?.json::<Value>().await?)
    }
}

#[async_trait]
impl CommandIndex for TypesenseIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CorrectionCandidate>, IndexError> {
        let raw = self.raw_search(query).await?;
        let response: SearchResponse = serde_json::from_value(raw)?;
        Ok(parse_hits(response, query.mode))
    }

    async fn insert(&self, document: &CommandDocument) -> Result<(), IndexError> {
        let response = self
            .client
            .post(format!("{}/documents", self.collection_url()))
            .header(API_KEY_HEADER, &self.api_key)
            .json(document)
            .send()
            .await?;
        check(response).await?;
        debug!(command = %document.command, source = %document.source, "Inserted command");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<String, IndexError> {
        let response = self
            .client
            .delete(format!("{}/documents/{}", self.collection_url(), id))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::NotFound(id.to_string()));
        }
        let deleted: Value = check(response).await?.json().await?;
        deleted
            .get("command")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| IndexError::Decode("deleted document has no command".to_string()))
    }
}

async fn check(response: Response) -> Result<Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(IndexError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Query-string parameters for one search.
pub fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let query_by = match query.mode {
        SearchMode::Exact | SearchMode::Token => "command".to_string(),
        SearchMode::Semantic => query.semantic_model.clone(),
        SearchMode::Hybrid => format!("command,{}", query.semantic_model),
    };
    let per_page = query.num_results.max(1).to_string();

    let mut params = vec![
        ("q", query.text.clone()),
        ("query_by", query_by),
        ("sort_by", "_text_match:desc,rank:desc,accuracy:desc".to_string()),
        ("text_match_type", "max_score".to_string()),
        ("prioritize_token_position", "false".to_string()),
        ("drop_tokens_threshold", "1".to_string()),
        ("typo_tokens_threshold", "1".to_string()),
        ("split_join_tokens", "fallback".to_string()),
        ("num_typos", query.num_typos.to_string()),
        ("min_len_1typo", "3".to_string()),
        ("min_len_2typo", "6".to_string()),
        ("per_page", per_page.clone()),
        ("limit_hits", per_page),
        ("prefix", "false".to_string()),
        ("use_cache", "false".to_string()),
        ("exclude_fields", EMBEDDING_MODELS.join(",")),
        ("search_cutoff_ms", "100".to_string()),
        ("max_candidates", "4".to_string()),
    ];
    if query.mode == SearchMode::Exact {
        params.push(("filter_by", exact_filter(&query.text)));
    }
    params
}

/// Equality filter on the command text. Backtick-quoted filter values
/// cannot contain a backtick, so those are dropped.
fn exact_filter(text: &str) -> String {
    let value: String = text.chars().filter(|c| *c != '`').collect();
    format!("command:=`{}`", value)
}

fn collection_schema(name: &str) -> Value {
    let mut fields = vec![
        json!({"name": "command", "type": "string", "sort": true}),
        json!({"name": "rank", "type": "float"}),
        json!({"name": "is_alias", "type": "bool", "optional": true}),
        json!({"name": "alias", "type": "string", "optional": true, "sort": true}),
        json!({"name": "accuracy", "type": "float", "optional": true}),
        json!({"name": "source", "type": "string", "optional": true, "sort": true}),
        json!({"name": "timestamp", "type": "int64", "optional": true}),
    ];
    for model in EMBEDDING_MODELS {
        fields.push(json!({
            "name": model,
            "type": "float[]",
            "embed": {
                "from": ["command"],
                "model_config": {"model_name": format!("ts/{}", model)}
            }
        }));
    }
    json!({
        "name": name,
        "fields": fields,
        "default_sorting_field": "rank",
        "token_separators": [",", ".", "-"]
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    document: HitDocument,
    #[serde(default)]
    text_match_info: Option<TextMatchInfo>,
    #[serde(default)]
    vector_distance: Option<f64>,
    #[serde(default)]
    hybrid_search_info: Option<HybridSearchInfo>,
}

#[derive(Debug, Deserialize)]
struct HitDocument {
    #[serde(default)]
    id: Option<String>,
    command: String,
    #[serde(default)]
    rank: f64,
    #[serde(default)]
    accuracy: f64,
    #[serde(default)]
    source: Option<CommandSource>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct TextMatchInfo {
    #[serde(default)]
    tokens_matched: u32,
}

#[derive(Debug, Deserialize)]
struct HybridSearchInfo {
    #[serde(default)]
    rank_fusion_score: f64,
}

/// Convert raw hits, picking the match signal that belongs to `mode`.
///
/// A missing score becomes a value that can never pass its threshold.
fn parse_hits(response: SearchResponse, mode: SearchMode) -> Vec<CorrectionCandidate> {
    response
        .hits
        .into_iter()
        .map(|hit| {
            let signal = match mode {
                SearchMode::Semantic => {
                    MatchSignal::VectorDistance(hit.vector_distance.unwrap_or(10.0))
                }
                SearchMode::Hybrid => MatchSignal::HybridScore(
                    hit.hybrid_search_info
                        .map(|h| h.rank_fusion_score)
                        .unwrap_or(0.0),
                ),
                SearchMode::Exact | SearchMode::Token => MatchSignal::TokensMatched(
                    hit.text_match_info.map(|t| t.tokens_matched).unwrap_or(0),
                ),
            };
            CorrectionCandidate {
                id: hit.document.id,
                command: hit.document.command,
                rank: hit.document.rank,
                accuracy: hit.document.accuracy,
                source: hit.document.source.unwrap_or_default(),
                timestamp_seconds: hit.document.timestamp,
                signal,
            }
        })
        .collect()
}
