pub mod config;
pub mod error;
pub mod rules;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use rules::{AreaMap, SkipList};
pub use types::*;
