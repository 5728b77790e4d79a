//! Connection state machine.
//!
//! Valid transitions:
//! - Disconnected -> Connecting (dial the engine)
//! - Connecting -> Authenticating (socket open, waiting for auth challenge)
//! - Authenticating -> Ready (auth accepted)
//! - any -> Disconnected (error or close)

use std::fmt;

use tokio::sync::watch;

use crate::error::SessionError;

/// Lifecycle of the engine connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Authenticated; pipeline runs may be sent.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Authenticating => write!(f, "Authenticating"),
            ConnectionState::Ready => write!(f, "Ready"),
        }
    }
}

impl ConnectionState {
    pub fn can_transition_to(&self, target: &ConnectionState) -> bool {
        matches!(
            (self, target),
            (ConnectionState::Disconnected, ConnectionState::Connecting)
                | (ConnectionState::Connecting, ConnectionState::Authenticating)
                | (ConnectionState::Authenticating, ConnectionState::Ready)
                | (_, ConnectionState::Disconnected)
        )
    }
}

/// Shared connection state. Observers can wait for a state via [`subscribe`].
///
/// [`subscribe`]: ConnectionMachine::subscribe
#[derive(Debug)]
pub struct ConnectionMachine {
    state: watch::Sender<ConnectionState>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }

    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current() == ConnectionState::Ready
    }

    /// Attempt to move to `target`, rejecting transitions not listed above.
    pub fn transition(&self, target: ConnectionState) -> Result<(), SessionError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(&target) {
                tracing::debug!("Connection state: {} -> {}", *state, target);
                *state = target;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        match rejected {
            None => Ok(()),
            Some(from) => Err(SessionError::InvalidTransition { from, to: target }),
        }
    }

    /// Force the machine back to Disconnected.
    pub fn reset(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                return false;
            }
            tracing::debug!("Connection state: {} -> Disconnected", *state);
            *state = ConnectionState::Disconnected;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Authenticating.to_string(), "Authenticating");
        assert_eq!(ConnectionState::Ready.to_string(), "Ready");
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ConnectionState::Disconnected.can_transition_to(&ConnectionState::Connecting));
        assert!(ConnectionState::Connecting.can_transition_to(&ConnectionState::Authenticating));
        assert!(ConnectionState::Authenticating.can_transition_to(&ConnectionState::Ready));

        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Ready,
        ] {
            assert!(state.can_transition_to(&ConnectionState::Disconnected));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ConnectionState::Disconnected.can_transition_to(&ConnectionState::Ready));
        assert!(!ConnectionState::Connecting.can_transition_to(&ConnectionState::Ready));
        assert!(!ConnectionState::Ready.can_transition_to(&ConnectionState::Connecting));
        assert!(!ConnectionState::Ready.can_transition_to(&ConnectionState::Authenticating));
    }

    #[test]
    fn test_full_cycle() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.current(), ConnectionState::Disconnected);

        machine.transition(ConnectionState::Connecting).unwrap();
        machine.transition(ConnectionState::Authenticating).unwrap();
        machine.transition(ConnectionState::Ready).unwrap();
        assert!(machine.is_ready());

        machine.transition(ConnectionState::Disconnected).unwrap();
        machine.transition(ConnectionState::Connecting).unwrap();
        assert_eq!(machine.current(), ConnectionState::Connecting);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let machine = ConnectionMachine::new();
        let err = machine.transition(ConnectionState::Ready).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Ready
            }
        ));
        assert_eq!(machine.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reset() {
        let machine = ConnectionMachine::new();
        machine.transition(ConnectionState::Connecting).unwrap();
        machine.reset();
        assert_eq!(machine.current(), ConnectionState::Disconnected);
        machine.reset();
        assert_eq!(machine.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribers_see_ready() {
        let machine = ConnectionMachine::new();
        let mut rx = machine.subscribe();
        machine.transition(ConnectionState::Connecting).unwrap();
        machine.transition(ConnectionState::Authenticating).unwrap();
        machine.transition(ConnectionState::Ready).unwrap();
        let state = rx.wait_for(|s| *s == ConnectionState::Ready).await.unwrap();
        assert_eq!(*state, ConnectionState::Ready);
    }
}
