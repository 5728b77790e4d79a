//! Error types for the engine session.

use parley_core::error::ParleyError;
use parley_resolve::ResolveError;

use crate::state::ConnectionState;

/// Errors from the websocket session and the REST probe.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
    #[error("engine request failed: {0}")]
    Http(String),
    #[error("engine returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("outbound queue closed")]
    QueueClosed,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Core(#[from] ParleyError),
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Core(ParleyError::from(err))
    }
}

impl From<SessionError> for ParleyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Core(inner) => inner,
            SessionError::QueueClosed => ParleyError::NotConnected,
            SessionError::AuthRejected(msg) => ParleyError::Protocol(msg),
            other => ParleyError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::InvalidTransition {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Ready,
        };
        assert_eq!(
            err.to_string(),
            "invalid connection state transition: Disconnected -> Ready"
        );
        assert_eq!(
            SessionError::AuthRejected("bad token".to_string()).to_string(),
            "authentication rejected: bad token"
        );
    }

    #[test]
    fn test_into_parley_error() {
        let err: ParleyError = SessionError::QueueClosed.into();
        assert!(matches!(err, ParleyError::NotConnected));

        let err: ParleyError = SessionError::WebSocket("reset".to_string()).into();
        assert!(matches!(err, ParleyError::Transport(_)));

        let err: ParleyError = SessionError::Core(ParleyError::Config("x".to_string())).into();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
