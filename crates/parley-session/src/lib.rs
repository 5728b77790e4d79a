//! Duplex session with the intent engine.
//!
//! Owns the single websocket connection, submits pipeline runs, and feeds
//! every run outcome through the fallback resolver until the caller has
//! exactly one answer.

pub mod error;
pub mod manager;
pub mod protocol;
pub mod rest;
pub mod state;

pub use error::SessionError;
pub use manager::{SessionManager, SessionSettings};
pub use rest::EngineRestClient;
pub use state::{ConnectionMachine, ConnectionState};
