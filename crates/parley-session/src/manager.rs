//! Duplex session manager.
//!
//! One websocket connection to the intent engine per manager. Submitters push
//! run frames onto an unbounded queue and return immediately; the connection
//! task drains that queue while the connection is `Ready`, skipping runs whose
//! request already expired, and dispatches every inbound message in order. The correlator is the only state shared between
//! the two sides.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use parley_core::config::ParleyConfig;
use parley_core::types::{
    reply_channel, CommandReply, CommandSource, FailureCode, PendingRequest, ReplyReceiver,
    RequestContext, ResolutionOutcome, Submission,
};
use parley_index::autolearn::AUTOLEARN_RANK;
use parley_index::AutolearnStore;
use parley_resolve::{continue_chain, Action, FallbackResolver, SessionCorrelator};

use crate::error::SessionError;
use crate::protocol::{Inbound, Outbound};
use crate::state::{ConnectionMachine, ConnectionState};

/// Connection and reply settings for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub token: String,
    pub reconnect_delay: Duration,
    pub pending_ttl: Duration,
    pub sweep_interval: Duration,
    /// Append `command_learned` to replies that taught the index something.
    pub feedback: bool,
    pub command_learned: String,
    pub command_not_found: String,
}

impl From<&ParleyConfig> for SessionSettings {
    fn from(config: &ParleyConfig) -> Self {
        Self {
            url: config.engine.websocket_url(),
            token: config.engine.token.clone(),
            reconnect_delay: Duration::from_millis(config.engine.reconnect_delay_ms),
            pending_ttl: Duration::from_secs(config.engine.pending_ttl_secs.max(1)),
            sweep_interval: Duration::from_secs(config.engine.sweep_interval_secs.max(1)),
            feedback: config.correction.feedback,
            command_learned: config.fallback.command_learned.clone(),
            command_not_found: config.fallback.command_not_found.clone(),
        }
    }
}

/// A run frame waiting for a `Ready` connection.
struct QueuedRun {
    id: u64,
    frame: String,
}

struct Inner {
    settings: SessionSettings,
    correlator: SessionCorrelator,
    resolver: FallbackResolver,
    autolearn: Option<AutolearnStore>,
    state: ConnectionMachine,
    outbound_tx: mpsc::UnboundedSender<QueuedRun>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<QueuedRun>>,
}

/// Handle to the engine session. Clones share the same connection.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        resolver: FallbackResolver,
        autolearn: Option<AutolearnStore>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                settings,
                correlator: SessionCorrelator::new(),
                resolver,
                autolearn,
                state: ConnectionMachine::new(),
                outbound_tx,
                outbound_rx: Mutex::new(outbound_rx),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    /// Resolves once the connection has authenticated.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Ready).await;
    }

    /// Number of runs awaiting an outcome.
    pub fn pending(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Submit a caller request. The receiver yields exactly one reply.
    ///
    /// The run is queued, not sent: if the connection is down it goes out
    /// on the next `Ready` connection, or expires.
    pub fn submit(&self, context: RequestContext) -> Result<ReplyReceiver, SessionError> {
        let (tx, rx) = reply_channel();
        self.submit_chain(Submission::new(context, tx))?;
        Ok(rx)
    }

    /// Submit and wait for the reply.
    pub async fn ask(&self, context: RequestContext) -> CommandReply {
        match self.submit(context) {
            Ok(rx) => rx.await.unwrap_or_else(|_| self.not_found()),
            Err(e) => {
                warn!(error = %e, "Failed to submit command");
                self.not_found()
            }
        }
    }

    fn submit_chain(&self, submission: Submission) -> Result<u64, SessionError> {
        let input = submission.engine_input();
        let id = self.inner.correlator.create(submission)?;

        let frame = match Outbound::run(id, input.clone()).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                self.abandon(id);
                return Err(e.into());
            }
        };
        if self.inner.outbound_tx.send(QueuedRun { id, frame }).is_err() {
            self.abandon(id);
            return Err(SessionError::QueueClosed);
        }

        debug!(
            id,
            command = %input.text,
            host = input.hostname.as_deref().unwrap_or("unknown"),
            "Queued pipeline run"
        );
        Ok(id)
    }

    fn abandon(&self, id: u64) {
        if let Some(pending) = self.inner.correlator.take(id) {
            pending.answer(self.not_found());
        }
    }

    /// The frame to send for a queued run, or `None` once its request has
    /// been answered or expired while it waited.
    fn live_frame(&self, run: QueuedRun) -> Option<String> {
        if self.inner.correlator.contains(run.id) {
            Some(run.frame)
        } else {
            debug!(id = run.id, "Dropping queued run with no pending request");
            None
        }
    }

    fn not_found(&self) -> CommandReply {
        CommandReply::new(self.inner.settings.command_not_found.clone(), false)
    }

    /// Handle one inbound text frame. Returns a frame to send back on the
    /// same socket immediately (the auth reply), bypassing the queue.
    pub async fn handle_message(&self, text: &str) -> Result<Option<String>, SessionError> {
        let message = match Inbound::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable engine message");
                return Ok(None);
            }
        };

        match message {
            Inbound::AuthRequired => {
                debug!("Authenticating engine connection");
                Ok(Some(Outbound::auth(&self.inner.settings.token).to_json()?))
            }
            Inbound::AuthOk => {
                self.inner.state.transition(ConnectionState::Ready)?;
                info!("Engine connection ready");
                Ok(None)
            }
            Inbound::AuthInvalid { message } => Err(SessionError::AuthRejected(message)),
            Inbound::Result {
                id,
                success: false,
                error,
            } => {
                let message = error.map(|e| e.message).unwrap_or_default();
                warn!(id, %message, "Engine rejected pipeline run");
                self.dispatch(id, ResolutionOutcome::failure(message, FailureCode::Other))
                    .await;
                Ok(None)
            }
            Inbound::Event { id, event } => {
                match event.outcome() {
                    Some(outcome) => self.dispatch(id, outcome).await,
                    None => debug!(id, kind = %event.kind, "Ignoring pipeline event"),
                }
                Ok(None)
            }
            Inbound::Result { .. } | Inbound::Other => Ok(None),
        }
    }

    async fn dispatch(&self, id: u64, outcome: ResolutionOutcome) {
        let Some(pending) = self.inner.correlator.take(id) else {
            debug!(id, "No pending request for run; dropping stale outcome");
            return;
        };
        let action = self.inner.resolver.resolve(&pending, &outcome).await;
        debug!(id, ?action, "Resolved run outcome");
        self.execute(pending, action).await;
    }

    async fn execute(&self, pending: PendingRequest, action: Action) {
        match action {
            Action::Answer { speech, ok } => pending.answer(CommandReply::new(speech, ok)),
            Action::Resubmit {
                text,
                make_terminal,
                strategy,
            } => {
                let previous = pending.id;
                let next = continue_chain(pending, text, make_terminal, strategy);
                match self.submit_chain(next) {
                    Ok(id) => debug!(previous, id, ?strategy, "Resubmitted command"),
                    Err(e) => warn!(previous, error = %e, "Failed to resubmit command"),
                }
            }
            Action::LearnThenAnswer { speech } => {
                let learned = match &self.inner.autolearn {
                    Some(store) => {
                        store
                            .learn(&pending.current_text, AUTOLEARN_RANK, CommandSource::Autolearn)
                            .await
                    }
                    None => false,
                };
                let speech = if learned && self.inner.settings.feedback {
                    format!("{}. {}", speech, self.inner.settings.command_learned)
                } else {
                    speech
                };
                pending.answer(CommandReply::new(speech, true));
            }
        }
    }

    /// Answer and evict every run older than the pending TTL.
    pub fn sweep_expired(&self) -> usize {
        let expired = self
            .inner
            .correlator
            .expire_older_than(self.inner.settings.pending_ttl);
        let count = expired.len();
        for pending in expired {
            warn!(
                id = pending.id,
                command = %pending.current_text,
                host = pending.host_label(),
                "Pending request expired without an outcome"
            );
            pending.answer(self.not_found());
        }
        count
    }

    /// Run the connection and the expiry sweep forever.
    pub async fn run(&self) {
        tokio::join!(self.connection_loop(), self.sweep_loop());
    }

    async fn connection_loop(&self) {
        loop {
            if let Err(e) = self.inner.state.transition(ConnectionState::Connecting) {
                warn!(error = %e, "Unexpected state before connecting");
                self.inner.state.reset();
                continue;
            }
            match self.run_connection().await {
                Ok(()) => info!("Engine connection closed"),
                Err(e) => warn!(error = %e, "Engine connection failed"),
            }
            self.inner.state.reset();
            tokio::time::sleep(self.inner.settings.reconnect_delay).await;
        }
    }

    async fn run_connection(&self) -> Result<(), SessionError> {
        let url = self.inner.settings.url.as_str();
        info!(%url, "Connecting to intent engine");
        let (socket, _response) = connect_async(url).await?;
        self.inner.state.transition(ConnectionState::Authenticating)?;

        let (mut sink, mut stream) = socket.split();
        let mut outbound = self.inner.outbound_rx.lock().await;

        loop {
            let ready = self.inner.state.is_ready();
            tokio::select! {
                run = outbound.recv(), if ready => {
                    let Some(run) = run else {
                        return Err(SessionError::QueueClosed);
                    };
                    if let Some(frame) = self.live_frame(run) {
                        sink.send(Message::Text(frame)).await?;
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_message(&text).await? {
                                sink.send(Message::Text(reply)).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn sweep_loop(&self) {
        let period = self
            .inner
            .settings
            .sweep_interval
            .max(Duration::from_millis(10));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep_expired();
        }
    }
}
