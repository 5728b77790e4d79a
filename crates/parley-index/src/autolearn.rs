//! Autolearn store: dedup-checked insertion of resolved commands.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use parley_core::rules::SkipList;
use parley_core::types::CommandSource;

use crate::index::CommandDocument;
use crate::search::CorrectionSearch;

/// Rank given to commands learned from a successful run.
pub const AUTOLEARN_RANK: f64 = 0.9;

/// Rank given to commands derived from device names.
pub const ENTITY_RANK: f64 = 0.5;

/// Inserts new commands into the correction index, refusing duplicates and
/// anything on the skip-list.
#[derive(Clone)]
pub struct AutolearnStore {
    search: CorrectionSearch,
    skip: SkipList,
}

impl AutolearnStore {
    pub fn new(search: CorrectionSearch, skip: SkipList) -> Self {
        Self { search, skip }
    }

    /// Learn one command. Returns `true` only when a new entry was created.
    pub async fn learn(&self, command: &str, rank: f64, source: CommandSource) -> bool {
        let command = command.trim();
        if command.is_empty() {
            return false;
        }
        if self.skip.is_skipped(command) {
            debug!(%command, "Command is on the skip-list; not learning");
            return false;
        }
        if self.search.exists(command).await {
            debug!(%command, "Refusing to add duplicate command");
            return false;
        }

        let document = CommandDocument::new(command, rank, source);
        match self.search.index().insert(&document).await {
            Ok(()) => {
                info!(%command, %source, rank, "Learned command");
                true
            }
            Err(e) => {
                warn!(%command, error = %e, "Failed to learn command");
                false
            }
        }
    }

    /// Derive on/off commands from device names and learn each one.
    ///
    /// Names are case-folded and deduplicated. Returns how many commands
    /// were newly learned.
    pub async fn add_from_entity_list<I, S>(&self, entities: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let devices: BTreeSet<String> = entities
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        info!(devices = devices.len(), "Adding commands for devices");

        let mut learned = 0;
        for device in &devices {
            for verb in ["turn on", "turn off"] {
                let command = format!("{} {}", verb, device);
                if self.learn(&command, ENTITY_RANK, CommandSource::HaEntities).await {
                    learned += 1;
                }
            }
        }
        learned
    }
}
