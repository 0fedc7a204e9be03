//! Observation surfaces for UI collaborators.
//!
//! The engine publishes a coarse status summary and a conflict watch. Both
//! are built on tokio watch channels so subscribers see the latest state
//! without polling or holding the store lock.

use crate::{store, Conflict, EntityId, OfflineStore};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Point-in-time sync summary, the "is my work saved yet" affordance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current connectivity belief
    pub is_online: bool,
    /// Whether a drain is running right now
    pub is_syncing: bool,
    /// Mutations awaiting replay
    pub pending: usize,
    /// Mutations currently being sent
    pub in_flight: usize,
    /// Mutations past the retry ceiling, held for manual retry
    pub failed: usize,
    /// Conflicts awaiting a resolution decision
    pub open_conflicts: usize,
    /// Writes permanently refused by the server and dropped from the queue,
    /// cumulative for this session. These are gone for good, so the count
    /// never decreases; a UI can diff it to prompt the user.
    pub rejected: usize,
}

impl SyncStatus {
    /// Whether any local work has not yet been confirmed by the server.
    pub fn has_unsynced_work(&self) -> bool {
        self.pending + self.in_flight + self.failed + self.open_conflicts > 0
    }
}

/// A subscription to the conflict registry, optionally scoped to one entity
/// type. `changed` resolves whenever a conflict is registered or resolved.
#[derive(Debug, Clone)]
pub struct ConflictWatch {
    revision: watch::Receiver<u64>,
    store: Arc<Mutex<OfflineStore>>,
    entity_type: Option<String>,
    entity_id: Option<EntityId>,
}

impl ConflictWatch {
    pub(crate) fn new(
        revision: watch::Receiver<u64>,
        store: Arc<Mutex<OfflineStore>>,
        entity_type: Option<String>,
        entity_id: Option<EntityId>,
    ) -> Self {
        Self {
            revision,
            store,
            entity_type,
            entity_id,
        }
    }

    /// The open conflicts matching this watch's scope, in detection order.
    pub fn current(&self) -> Vec<Conflict> {
        store::lock(&self.store)
            .open_conflicts(self.entity_type.as_deref(), self.entity_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Wait for the next change to the conflict registry, then return the
    /// matching open conflicts. Returns `None` once the engine shuts down.
    pub async fn changed(&mut self) -> Option<Vec<Conflict>> {
        self.revision.changed().await.ok()?;
        Some(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_unsynced_work() {
        let status = SyncStatus {
            is_online: true,
            ..Default::default()
        };
        assert!(!status.has_unsynced_work());

        let status = SyncStatus {
            open_conflicts: 1,
            ..Default::default()
        };
        assert!(status.has_unsynced_work());
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_string(&SyncStatus::default()).unwrap();
        assert!(json.contains("\"isOnline\""));
        assert!(json.contains("\"openConflicts\""));
        assert!(json.contains("\"rejected\""));
    }

    #[test]
    fn rejection_is_terminal_not_unsynced() {
        let status = SyncStatus {
            rejected: 2,
            ..Default::default()
        };
        assert!(!status.has_unsynced_work());
    }
}
