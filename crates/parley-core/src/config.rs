use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};
use crate::rules::{AreaMap, SkipList};

/// Top-level configuration for Parley.
///
/// Loaded from `~/.parley/config.toml` by default. Each section corresponds
/// to one collaborator or one stage of the fallback chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `PARLEY_*` environment overrides for the rewrite rules.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply JSON-encoded overrides from an arbitrary lookup.
    ///
    /// A malformed value replaces the setting with an empty one.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PARLEY_AREA_AWARE_COMMANDS") {
            self.rewrite.area_aware_commands = json_list("PARLEY_AREA_AWARE_COMMANDS", &raw);
        }
        if let Some(raw) = lookup("PARLEY_AREAS") {
            self.rewrite.areas = json_list("PARLEY_AREAS", &raw);
        }
        if let Some(raw) = lookup("PARLEY_SKIP_PREFIXES") {
            self.rewrite.skip_prefixes = json_list("PARLEY_SKIP_PREFIXES", &raw);
        }
        if let Some(raw) = lookup("PARLEY_LOCATIONS") {
            self.rewrite.locations = match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(key = "PARLEY_LOCATIONS", error = %e, "Not a valid JSON map; using empty map");
                    HashMap::new()
                }
            };
        }
    }

    pub fn area_map(&self) -> AreaMap {
        AreaMap::new(
            self.rewrite.area_aware_commands.clone(),
            self.rewrite.areas.clone(),
            self.rewrite.locations.clone(),
        )
    }

    pub fn skip_list(&self) -> SkipList {
        SkipList::new(self.rewrite.skip_prefixes.clone())
    }
}

fn json_list(key: &str, raw: &str) -> Vec<String> {
    match serde_json::from_str(raw) {
        Ok(list) => list,
        Err(e) => {
            warn!(key, error = %e, "Not a valid JSON list; using empty list");
            Vec::new()
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Intent engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Long-lived access token sent in the auth message.
    pub token: String,
    /// Fixed delay before every reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Pending requests older than this are answered and evicted.
    pub pending_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "homeassistant.local".to_string(),
            port: 8123,
            tls: false,
            token: String::new(),
            reconnect_delay_ms: 1000,
            pending_ttl_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}

impl EngineConfig {
    pub fn websocket_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}/api/websocket", scheme, self.host, self.port)
    }

    pub fn rest_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Correction index (search service) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub api_key: String,
    pub collection: String,
    pub timeout_secs: u64,
    /// Used for schema creation, which may download embedding models.
    pub slow_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8108,
            protocol: "http".to_string(),
            api_key: "testing".to_string(),
            collection: "commands".to_string(),
            timeout_secs: 1,
            slow_timeout_secs: 120,
        }
    }
}

impl IndexConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// How the correction index is queried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Equality filter on the command text.
    Exact,
    /// Fuzzy lexical match scored by matched tokens.
    #[default]
    #[serde(alias = "off")]
    Token,
    /// Vector similarity scored by distance.
    #[serde(alias = "on")]
    Semantic,
    /// Lexical + vector rank fusion.
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Exact => write!(f, "exact"),
            SearchMode::Token => write!(f, "token"),
            SearchMode::Semantic => write!(f, "semantic"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(SearchMode::Exact),
            "token" | "off" | "false" => Ok(SearchMode::Token),
            "semantic" | "on" | "true" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(ParleyError::Config(format!("unknown search mode: {}", other))),
        }
    }
}

/// Correction and autolearn behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Index-based correction of failed commands.
    pub enabled: bool,
    /// Insert successfully resolved commands into the index.
    pub autolearn: bool,
    /// Tell the user when a command was learned.
    pub feedback: bool,
    pub mode: SearchMode,
    /// Maximum typos per token for lexical queries.
    pub search_distance: u32,
    pub num_results: u32,
    /// Inclusive lower bound on matched tokens.
    pub token_match_threshold: u32,
    /// Inclusive upper bound on vector distance (smaller is closer).
    pub vector_distance_threshold: f64,
    /// Inclusive lower bound on rank-fusion score (larger is closer).
    pub hybrid_score_threshold: f64,
    pub semantic_model: String,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            autolearn: false,
            feedback: true,
            mode: SearchMode::default(),
            search_distance: 2,
            num_results: 1,
            token_match_threshold: 3,
            vector_distance_threshold: 0.29,
            hybrid_score_threshold: 0.85,
            semantic_model: "all-MiniLM-L12-v2".to_string(),
        }
    }
}

/// Area-aware rewriting and autolearn skip-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    pub area_awareness: bool,
    /// Phrases that make a command eligible for an area-aware retry.
    pub area_aware_commands: Vec<String>,
    /// Area names; a command already naming one is never rewritten.
    pub areas: Vec<String>,
    /// Device hostname to location name.
    pub locations: HashMap<String, String>,
    /// Commands starting with any of these are never autolearned.
    pub skip_prefixes: Vec<String>,
}

/// Last-resort behavior once correction has failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Route the verbatim phrase back through the engine with a marker.
    pub forward_to_chat: bool,
    pub final_forward_marker: String,
    pub command_not_found: String,
    pub command_learned: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            forward_to_chat: false,
            final_forward_marker: "parley-forward".to_string(),
            command_not_found: "Sorry, I can't find that command".to_string(),
            command_learned: "I learned that command".to_string(),
        }
    }
}

/// OpenAI-compatible chat completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// No key means the LLM fallback is not configured.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.endpoints.anyscale.com/v1".to_string(),
            model: "meta-llama/Llama-2-70b-chat-hf".to_string(),
            system_prompt: "Keep your answers as short as possible.".to_string(),
            temperature: 0.1,
            timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty() && k != "undefined")
            .unwrap_or(false)
    }
}
