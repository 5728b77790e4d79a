//! Static rewrite rules: the autolearn skip-list and the area map.
//!
//! Both are built once at startup and read-only afterwards. Malformed JSON
//! input degrades to an empty rule set and is logged; it never aborts startup.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

/// Command prefixes that must never be autolearned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipList {
    prefixes: Vec<String>,
}

impl SkipList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Parse a JSON list of prefixes, e.g. `["what time", "set a timer"]`.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(list) => Self::new(list),
            Err(e) => {
                warn!(error = %e, "Skip-list is not a valid JSON list; using empty list");
                Self::default()
            }
        }
    }

    pub fn is_skipped(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.prefixes.iter().any(|p| lower.starts_with(p.as_str()))
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// Phrase filters and host-to-location mapping for area-aware retries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AreaMap {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    locations: HashMap<String, String>,
}

impl AreaMap {
    pub fn new<I, E>(include: I, exclude: E, locations: HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            include: lowered(include),
            exclude: lowered(exclude),
            locations,
        }
    }

    /// Build from the three JSON-encoded settings. Each one degrades on its own.
    pub fn from_json(include: &str, exclude: &str, locations: &str) -> Self {
        let include = serde_json::from_str::<Vec<String>>(include).unwrap_or_else(|e| {
            warn!(error = %e, "Area-aware commands are not a valid JSON list; using empty list");
            Vec::new()
        });
        let exclude = serde_json::from_str::<Vec<String>>(exclude).unwrap_or_else(|e| {
            warn!(error = %e, "Areas are not a valid JSON list; using empty list");
            Vec::new()
        });
        let locations =
            serde_json::from_str::<HashMap<String, String>>(locations).unwrap_or_else(|e| {
                warn!(error = %e, "Locations are not a valid JSON map; using empty map");
                HashMap::new()
            });
        Self::new(include, exclude, locations)
    }

    /// True when the command names an area-aware action and no explicit area.
    pub fn is_area_aware(&self, command: &str) -> bool {
        let lower = command.to_lowercase();
        self.include.iter().any(|p| lower.contains(p.as_str()))
            && !self.exclude.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn location_for(&self, host: &str) -> Option<&str> {
        self.locations.get(host).map(String::as_str)
    }

    /// `"<command> in the <location>"` when the command qualifies and the host is mapped.
    pub fn rewrite(&self, command: &str, host: Option<&str>) -> Option<String> {
        if !self.is_area_aware(command) {
            return None;
        }
        let location = self.location_for(host?)?;
        Some(format!("{} in the {}", command, location))
    }
}

fn lowered<I: IntoIterator<Item = String>>(items: I) -> BTreeSet<String> {
    items
        .into_iter()
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
