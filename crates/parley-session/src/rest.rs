//! REST probe and device-name source for the intent engine.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use parley_core::config::EngineConfig;

use crate::error::SessionError;

/// Entity domains whose names become on/off commands.
pub const ENTITY_DOMAINS: [&str; 4] = ["cover.", "fan.", "light.", "switch."];

/// Component that must be loaded for pipeline runs to work.
pub const PIPELINE_COMPONENT: &str = "assist_pipeline";

#[derive(Debug, Clone, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    #[serde(default)]
    pub attributes: EntityAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityAttributes {
    #[serde(default)]
    pub friendly_name: Option<String>,
}

pub struct EngineRestClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl EngineRestClient {
    pub fn from_config(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: config.rest_url(),
            token: config.token.clone(),
        }
    }

    /// True when the engine has the pipeline component loaded.
    pub async fn supports_pipeline(&self) -> Result<bool, SessionError> {
        let components: Vec<String> = self.get_json("/api/components").await?;
        let supported = components.iter().any(|c| c == PIPELINE_COMPONENT);
        info!(supported, "Checked engine for pipeline support");
        Ok(supported)
    }

    /// Friendly names of every switchable device, lower-cased and deduplicated.
    pub async fn entity_names(&self) -> Result<Vec<String>, SessionError> {
        let states: Vec<EntityState> = self.get_json("/api/states").await?;
        debug!(entities = states.len(), "Fetched engine entity states");
        Ok(switchable_names(&states))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Keep entities in [`ENTITY_DOMAINS`] that carry a friendly name.
pub fn switchable_names(states: &[EntityState]) -> Vec<String> {
    states
        .iter()
        .filter(|s| ENTITY_DOMAINS.iter().any(|d| s.entity_id.starts_with(d)))
        .filter_map(|s| s.attributes.friendly_name.as_deref())
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
