use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

// =============================================================================
// Caller-facing request / reply
// =============================================================================

/// A command as received from the caller, before it is sent to the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Recognized command text.
    pub text: String,
    /// Device that issued the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Locale hint from the device. Never forwarded to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RequestContext {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// The single terminal message delivered to a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub speech: String,
    pub ok: bool,
}

impl CommandReply {
    pub fn new(speech: impl Into<String>, ok: bool) -> Self {
        Self {
            speech: speech.into(),
            ok,
        }
    }
}

/// One-shot handle used to deliver the final reply to the caller.
pub type ReplySender = oneshot::Sender<CommandReply>;

/// Receiving half held by the caller.
pub type ReplyReceiver = oneshot::Receiver<CommandReply>;

/// Create a fresh reply channel.
pub fn reply_channel() -> (ReplySender, ReplyReceiver) {
    oneshot::channel()
}

// =============================================================================
// Request chain
// =============================================================================

/// A run that is about to be sent to the intent engine.
///
/// Carries the chain state that survives resubmission: the original text,
/// the reply handle and the retry flags.
#[derive(Debug)]
pub struct Submission {
    pub original_text: String,
    pub text: String,
    pub hostname: Option<String>,
    pub reply: ReplySender,
    /// No further correction may be attempted for this chain.
    pub terminal: bool,
    /// Area-aware rewrite already used by this chain.
    pub area_tried: bool,
    /// The chain was routed through the final-forward marker.
    pub forwarded: bool,
}

impl Submission {
    /// Start a new chain from a caller request.
    pub fn new(context: RequestContext, reply: ReplySender) -> Self {
        Self {
            original_text: context.text.clone(),
            text: context.text,
            hostname: context.hostname,
            reply,
            terminal: false,
            area_tried: false,
            forwarded: false,
        }
    }

    /// Engine input for this run. The locale field is dropped.
    pub fn engine_input(&self) -> RequestContext {
        RequestContext {
            text: self.text.clone(),
            hostname: self.hostname.clone(),
            language: None,
        }
    }
}

/// One in-flight round trip through the intent engine.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub original_text: String,
    pub current_text: String,
    pub origin_host: Option<String>,
    pub reply: ReplySender,
    pub terminal: bool,
    pub area_tried: bool,
    pub forwarded: bool,
    pub created_at: Instant,
}

impl PendingRequest {
    pub fn from_submission(id: u64, submission: Submission) -> Self {
        Self {
            id,
            original_text: submission.original_text,
            current_text: submission.text,
            origin_host: submission.hostname,
            reply: submission.reply,
            terminal: submission.terminal,
            area_tried: submission.area_tried,
            forwarded: submission.forwarded,
            created_at: Instant::now(),
        }
    }

    /// Continue this chain with new text under a new identifier.
    pub fn into_resubmission(self, text: String) -> Submission {
        Submission {
            original_text: self.original_text,
            text,
            hostname: self.origin_host,
            reply: self.reply,
            terminal: self.terminal,
            area_tried: self.area_tried,
            forwarded: self.forwarded,
        }
    }

    /// Deliver the final reply. The caller may have gone away; that is not an error.
    pub fn answer(self, reply: CommandReply) {
        if self.reply.send(reply).is_err() {
            tracing::debug!(id = self.id, "Caller dropped before reply was delivered");
        }
    }

    pub fn host_label(&self) -> &str {
        self.origin_host.as_deref().unwrap_or("unknown")
    }
}

// =============================================================================
// Engine outcome
// =============================================================================

/// Failure reason reported by the intent engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    NoIntentMatch,
    NoValidTargets,
    Other,
}

impl FailureCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no_intent_match" => FailureCode::NoIntentMatch,
            "no_valid_targets" => FailureCode::NoValidTargets,
            _ => FailureCode::Other,
        }
    }

    /// Failures that the fallback chain may try to recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureCode::NoIntentMatch | FailureCode::NoValidTargets)
    }
}

/// Result of one engine run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub succeeded: bool,
    pub speech_text: String,
    pub failure_code: Option<FailureCode>,
}

impl ResolutionOutcome {
    pub fn success(speech: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            speech_text: speech.into(),
            failure_code: None,
        }
    }

    pub fn failure(speech: impl Into<String>, code: FailureCode) -> Self {
        Self {
            succeeded: false,
            speech_text: speech.into(),
            failure_code: Some(code),
        }
    }
}

// =============================================================================
// Correction index
// =============================================================================

/// Where a command in the correction index came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    #[default]
    Manual,
    HaEntities,
    Autolearn,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Manual => write!(f, "manual"),
            CommandSource::HaEntities => write!(f, "ha_entities"),
            CommandSource::Autolearn => write!(f, "autolearn"),
        }
    }
}

/// The score a hit was ranked by. Exactly one is populated per search mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchSignal {
    TokensMatched(u32),
    VectorDistance(f64),
    HybridScore(f64),
}

/// One index hit.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrectionCandidate {
    pub id: Option<String>,
    pub command: String,
    pub rank: f64,
    pub accuracy: f64,
    pub source: CommandSource,
    pub timestamp_seconds: i64,
    pub signal: MatchSignal,
}

impl CorrectionCandidate {
    pub fn new(command: impl Into<String>, signal: MatchSignal) -> Self {
        Self {
            id: None,
            command: command.into(),
            rank: 0.9,
            accuracy: 1.0,
            source: CommandSource::Manual,
            timestamp_seconds: Utc::now().timestamp(),
            signal,
        }
    }
}
