//! Fallback resolver.
//!
//! Given the outcome of one engine run, decide what happens to the request
//! chain next. The resolver performs lookups (index, chat) but never talks
//! to the engine or to the caller; the session manager executes the returned
//! [`Action`].
//!
//! Failure handling, in order:
//! 1. area-aware rewrite (once per chain, corrected chains included)
//! 2. stop if the chain is terminal
//! 3. correction index search
//! 4. chat completion fallback
//! 5. final forward through the engine, or the not-found answer

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_core::config::ParleyConfig;
use parley_core::rules::AreaMap;
use parley_core::types::{PendingRequest, ResolutionOutcome, Submission};
use parley_index::CorrectionSearch;

use crate::llm::ChatService;

/// Which fallback produced a resubmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    AreaAware,
    Correction,
    FinalForward,
}

/// What to do with a request chain after one engine run.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Deliver this reply and end the chain.
    Answer { speech: String, ok: bool },
    /// Send new text through the engine under a new identifier.
    Resubmit {
        text: String,
        make_terminal: bool,
        strategy: Strategy,
    },
    /// Learn the chain's current text, then answer successfully.
    LearnThenAnswer { speech: String },
}

impl Action {
    pub fn answer(speech: impl Into<String>, ok: bool) -> Self {
        Action::Answer {
            speech: speech.into(),
            ok,
        }
    }
}

/// Continue `pending` with new text, carrying the chain flags forward.
pub fn continue_chain(
    pending: PendingRequest,
    text: String,
    make_terminal: bool,
    strategy: Strategy,
) -> Submission {
    let mut next = pending.into_resubmission(text);
    next.terminal |= make_terminal;
    match strategy {
        Strategy::AreaAware => next.area_tried = true,
        Strategy::FinalForward => next.forwarded = true,
        Strategy::Correction => {}
    }
    next
}

/// Resolver switches and fixed texts.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub correction: bool,
    pub autolearn: bool,
    pub area_awareness: bool,
    pub areas: AreaMap,
    pub forward_to_chat: bool,
    pub final_forward_marker: String,
    pub command_not_found: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&ParleyConfig::default())
    }
}

impl From<&ParleyConfig> for ResolverConfig {
    fn from(config: &ParleyConfig) -> Self {
        Self {
            correction: config.correction.enabled,
            autolearn: config.correction.autolearn,
            area_awareness: config.rewrite.area_awareness,
            areas: config.area_map(),
            forward_to_chat: config.fallback.forward_to_chat,
            final_forward_marker: config.fallback.final_forward_marker.clone(),
            command_not_found: config.fallback.command_not_found.clone(),
        }
    }
}

pub struct FallbackResolver {
    config: ResolverConfig,
    search: Option<CorrectionSearch>,
    chat: Option<Arc<dyn ChatService>>,
}

impl FallbackResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            search: None,
            chat: None,
        }
    }

    pub fn with_search(mut self, search: CorrectionSearch) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatService>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Decide the next step for `pending` given the engine's `outcome`.
    pub async fn resolve(&self, pending: &PendingRequest, outcome: &ResolutionOutcome) -> Action {
        if outcome.succeeded {
            return self.on_success(pending, outcome);
        }

        let recoverable = outcome
            .failure_code
            .map(|code| code.is_recoverable())
            .unwrap_or(false);
        if !recoverable {
            debug!(
                id = pending.id,
                code = ?outcome.failure_code,
                "Engine failure is not recoverable"
            );
            return Action::answer(self.engine_speech(outcome), false);
        }

        if let Some(action) = self.try_area_aware(pending) {
            return action;
        }

        if pending.terminal {
            info!(
                id = pending.id,
                command = %pending.current_text,
                "Terminal chain failed again; giving up"
            );
            return Action::answer(self.engine_speech(outcome), false);
        }

        if let Some(action) = self.try_correction(pending).await {
            return action;
        }

        if let Some(chat) = &self.chat {
            return match chat.complete(&pending.original_text).await {
                Ok(speech) if !speech.trim().is_empty() => Action::answer(speech, true),
                Ok(_) => {
                    warn!(id = pending.id, "Chat fallback returned empty text");
                    Action::answer(self.config.command_not_found.clone(), false)
                }
                Err(e) => {
                    warn!(id = pending.id, error = %e, "Chat fallback failed");
                    Action::answer(self.config.command_not_found.clone(), false)
                }
            };
        }

        if self.config.forward_to_chat {
            let text = format!(
                "{}-{} {}",
                self.config.final_forward_marker,
                pending.host_label(),
                pending.current_text
            );
            info!(id = pending.id, forward = %text, "Final forward through engine");
            return Action::Resubmit {
                text,
                make_terminal: true,
                strategy: Strategy::FinalForward,
            };
        }

        Action::answer(self.engine_speech(outcome), false)
    }

    fn on_success(&self, pending: &PendingRequest, outcome: &ResolutionOutcome) -> Action {
        let speech = outcome.speech_text.clone();
        if self.config.autolearn && !pending.forwarded {
            Action::LearnThenAnswer { speech }
        } else {
            Action::answer(speech, true)
        }
    }

    fn try_area_aware(&self, pending: &PendingRequest) -> Option<Action> {
        // Final-forward text carries a routing marker and is never rewritten.
        if !self.config.area_awareness || pending.area_tried || pending.forwarded {
            return None;
        }
        let text = self
            .config
            .areas
            .rewrite(&pending.current_text, pending.origin_host.as_deref())?;
        debug!(id = pending.id, command = %text, "Trying area-aware command");
        Some(Action::Resubmit {
            text,
            make_terminal: false,
            strategy: Strategy::AreaAware,
        })
    }

    async fn try_correction(&self, pending: &PendingRequest) -> Option<Action> {
        if !self.config.correction {
            return None;
        }
        let search = self.search.as_ref()?;
        let outcome = search.search(&pending.current_text).await;
        if !outcome.matched {
            return None;
        }
        info!(
            id = pending.id,
            command = %pending.current_text,
            corrected = %outcome.command,
            "Resubmitting corrected command"
        );
        Some(Action::Resubmit {
            text: outcome.command,
            make_terminal: true,
            strategy: Strategy::Correction,
        })
    }

    fn engine_speech(&self, outcome: &ResolutionOutcome) -> String {
        if outcome.speech_text.trim().is_empty() {
            self.config.command_not_found.clone()
        } else {
            outcome.speech_text.clone()
        }
    }
}
