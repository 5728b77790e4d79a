//! Correction index for Parley.
//!
//! Wraps an external ranked-search service that stores known-good commands.
//! Provides the `CommandIndex` seam with a Typesense implementation and an
//! in-memory implementation for tests, search-mode scoring, and the
//! dedup-checked autolearn store.

pub mod autolearn;
pub mod error;
pub mod index;
pub mod memory;
pub mod search;
pub mod typesense;

pub use autolearn::AutolearnStore;
pub use error::IndexError;
pub use index::{CommandDocument, CommandIndex, SearchQuery};
pub use memory::MemoryIndex;
pub use search::{CorrectionSearch, SearchOutcome, SearchSettings, Thresholds};
pub use typesense::TypesenseIndex;
