//! Session correlator: run identifier -> pending request.
//!
//! The submission path inserts, the event-dispatch path removes. Both run on
//! different tasks, so the map sits behind a mutex. Identifiers come from an
//! atomic counter seeded with the wall-clock milliseconds at construction,
//! which keeps them increasing and unique for the lifetime of the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use parley_core::types::{PendingRequest, Submission};

use crate::error::ResolveError;

pub struct SessionCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Default for SessionCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCorrelator {
    pub fn new() -> Self {
        let seed = chrono::Utc::now().timestamp_millis().max(1) as u64;
        Self::starting_at(seed)
    }

    /// Start identifiers at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a submission under a fresh identifier.
    pub fn create(&self, submission: Submission) -> Result<u64, ResolveError> {
        let mut submission = submission;
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            match self.insert(id, submission)? {
                None => return Ok(id),
                Some(rejected) => {
                    warn!(id, "Run identifier already pending; drawing another");
                    submission = rejected;
                }
            }
        }
    }

    /// Insert under an explicit identifier. First writer wins: when `id` is
    /// already pending, nothing is replaced and the submission is handed back.
    pub fn insert(
        &self,
        id: u64,
        submission: Submission,
    ) -> Result<Option<Submission>, ResolveError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ResolveError::Poisoned(e.to_string()))?;
        if pending.contains_key(&id) {
            return Ok(Some(submission));
        }
        pending.insert(id, PendingRequest::from_submission(id, submission));
        Ok(None)
    }

    /// Remove and return the request for `id`. A second call returns `None`.
    pub fn take(&self, id: u64) -> Option<PendingRequest> {
        match self.pending.lock() {
            Ok(mut pending) => pending.remove(&id),
            Err(e) => {
                warn!(id, error = %e, "Correlator lock poisoned; dropping lookup");
                None
            }
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every request older than `ttl` and hand them back for answering.
    pub fn expire_older_than(&self, ttl: Duration) -> Vec<PendingRequest> {
        let mut pending = match self.pending.lock() {
            Ok(p) => p,
            Err(_) => return vec![],
        };

        let stale: Vec<u64> = pending
            .iter()
            .filter(|(_, req)| req.created_at.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();

        let expired: Vec<PendingRequest> =
            stale.iter().filter_map(|id| pending.remove(id)).collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired pending requests");
        }
        expired
    }
}
