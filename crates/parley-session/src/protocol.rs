//! Intent engine websocket messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_core::types::{FailureCode, RequestContext, ResolutionOutcome};

/// Message type of a pipeline run request.
pub const RUN_TYPE: &str = "assist_pipeline/run";

/// Both ends of every run are the intent stage.
pub const INTENT_STAGE: &str = "intent";

/// Messages sent to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "auth")]
    Auth { access_token: String },
    #[serde(rename = "assist_pipeline/run")]
    Run {
        id: u64,
        input: RequestContext,
        start_stage: &'static str,
        end_stage: &'static str,
    },
}

impl Outbound {
    pub fn auth(token: &str) -> Self {
        Outbound::Auth {
            access_token: token.to_string(),
        }
    }

    /// An intent-only run for `input`.
    pub fn run(id: u64, input: RequestContext) -> Self {
        Outbound::Run {
            id,
            input,
            start_stage: INTENT_STAGE,
            end_stage: INTENT_STAGE,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    AuthRequired,
    AuthOk,
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    /// Acknowledgement of a command, sent before any run event.
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        error: Option<ErrorInfo>,
    },
    Event {
        id: u64,
        event: PipelineEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl PipelineEvent {
    /// The run outcome carried by this event, if it is a terminal one.
    ///
    /// `intent-end` carries the engine's answer. A pipeline `error` event
    /// ends the run without one.
    pub fn outcome(&self) -> Option<ResolutionOutcome> {
        match self.kind.as_str() {
            "intent-end" => Some(intent_outcome(&self.data)),
            "error" => {
                let message = self
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(ResolutionOutcome::failure(message, FailureCode::Other))
            }
            _ => None,
        }
    }
}

fn intent_outcome(data: &Value) -> ResolutionOutcome {
    let response = data.pointer("/intent_output/response");
    let field = |path: &str| {
        response
            .and_then(|r| r.pointer(path))
            .and_then(Value::as_str)
            .unwrap_or_default()
    };

    let speech = field("/speech/plain/speech");
    match field("/response_type") {
        "action_done" | "query_answer" => ResolutionOutcome::success(speech),
        "error" => ResolutionOutcome::failure(speech, FailureCode::from_code(field("/data/code"))),
        _ => ResolutionOutcome::failure(speech, FailureCode::Other),
    }
}
