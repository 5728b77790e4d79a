//! Chat completion fallback.
//!
//! - `ChatService` is the seam the resolver calls when nothing else matched.
//! - `OpenAiChat` talks to any OpenAI-compatible `/chat/completions` endpoint.
//! - `MockChat` returns queued replies for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use parley_core::config::LlmConfig;

use crate::error::ResolveError;

/// A black-box text completion service.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Complete `text` and return speech-ready output.
    async fn complete(&self, text: &str) -> Result<String, ResolveError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// OpenAI-compatible chat client.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f32,
}

impl OpenAiChat {
    /// Build a client from configuration. Returns `None` when no key is set.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let api_key = config.api_key.as_deref()?.trim().to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Some(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the endpoint which models it serves. When it lists exactly one,
    /// that model replaces the configured one for every later call.
    pub async fn resolve_model(&mut self) -> Result<(), ResolveError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?;
        let models: ModelList = response.json().await?;

        if let [only] = models.data.as_slice() {
            info!(model = %only.id, "Only one model on chat endpoint; forcing it");
            self.model = only.id.clone();
        } else {
            debug!(
                available = models.data.len(),
                model = %self.model,
                "Using configured chat model"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ChatService for OpenAiChat {
    async fn complete(&self, text: &str) -> Result<String, ResolveError> {
        info!(%text, model = %self.model, "Chat completion request");
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            warn!(%status, body = %err_body, "Chat endpoint returned an error");
            return Err(ResolveError::Llm(format!("status {}: {}", status, err_body)));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ResolveError::EmptyCompletion)?;

        let speech = flatten_for_speech(&content);
        info!(response = %speech, "Chat completion response");
        Ok(speech)
    }
}

/// Make completion output fit for TTS and single-line display.
pub fn flatten_for_speech(text: &str) -> String {
    text.replace('\n', " ").replace('\r', "").trim_start().to_string()
}

/// Chat double that replays queued replies and records prompts.
#[derive(Default)]
pub struct MockChat {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion.
    pub fn reply(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    /// Queue a failed completion.
    pub fn fail(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn push(&self, entry: Result<String, String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(entry);
        }
    }
}

#[async_trait]
impl ChatService for MockChat {
    async fn complete(&self, text: &str) -> Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(text.to_string());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| ResolveError::Poisoned(e.to_string()))?
            .pop_front();
        match next {
            Some(Ok(text)) => Ok(flatten_for_speech(&text)),
            Some(Err(reason)) => Err(ResolveError::Llm(reason)),
            None => Err(ResolveError::EmptyCompletion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_for_speech() {
        assert_eq!(
            flatten_for_speech("\n  It is sunny.\r\nHigh of 20."),
            "It is sunny. High of 20."
        );
        assert_eq!(flatten_for_speech("plain"), "plain");
    }

    #[test]
    fn test_from_config_requires_key() {
        assert!(OpenAiChat::from_config(&LlmConfig::default()).is_none());

        let undefined = LlmConfig {
            api_key: Some("undefined".to_string()),
            ..LlmConfig::default()
        };
        assert!(OpenAiChat::from_config(&undefined).is_none());

        let configured = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://localhost:9/v1/".to_string(),
            ..LlmConfig::default()
        };
        let chat = OpenAiChat::from_config(&configured).unwrap();
        assert_eq!(chat.base_url, "http://localhost:9/v1");
        assert_eq!(chat.model(), "meta-llama/Llama-2-70b-chat-hf");
    }

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "what is the weather",
                },
            ],
            temperature: 0.1,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "what is the weather");
    }

    #[test]
    fn test_model_list_parsing() {
        let one: ModelList =
            serde_json::from_str(r#"{"data":[{"id":"local-model","object":"model"}]}"#).unwrap();
        assert_eq!(one.data.len(), 1);
        assert_eq!(one.data[0].id, "local-model");
        let none: ModelList = serde_json::from_str("{}").unwrap();
        assert!(none.data.is_empty());
    }

    #[tokio::test]
    async fn test_mock_chat_replays_in_order() {
        let chat = MockChat::new().reply("first\nline").fail("down");
        assert_eq!(chat.complete("a").await.unwrap(), "first line");
        assert!(matches!(chat.complete("b").await, Err(ResolveError::Llm(_))));
        assert!(matches!(
            chat.complete("c").await,
            Err(ResolveError::EmptyCompletion)
        ));
        assert_eq!(chat.calls(), 3);
        assert_eq!(chat.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let config = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let chat = OpenAiChat::from_config(&config).unwrap();
        assert!(matches!(chat.complete("hi").await, Err(ResolveError::Llm(_))));
    }
}
