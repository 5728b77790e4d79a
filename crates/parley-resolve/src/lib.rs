//! Command resolution for Parley.
//!
//! Correlates asynchronous engine outcomes back to the request that caused
//! them and decides, for each failed intent, which fallback to try next.

pub mod correlator;
pub mod error;
pub mod llm;
pub mod resolver;

pub use correlator::SessionCorrelator;
pub use error::ResolveError;
pub use llm::{ChatService, MockChat, OpenAiChat};
pub use resolver::{continue_chain, Action, FallbackResolver, ResolverConfig, Strategy};
