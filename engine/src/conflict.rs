//! Conflict types.
//!
//! A conflict is not an error: it is a first-class outcome linking a failed
//! mutation to the server's current state, awaiting an explicit user or
//! policy decision. Conflicts are never auto-resolved and never expire.

use crate::{ConflictId, EntityKey, Method, MutationId, Timestamp, VersionMarker};
use serde::{Deserialize, Serialize};

/// The entity representation returned by the server at detection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    pub payload: serde_json::Value,
    pub version_marker: VersionMarker,
}

/// Resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictStatus {
    Open,
    ResolvedApplyOffline,
    ResolvedAcceptServer,
}

/// How to resolve a conflict. Both actions are irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionAction {
    /// Force-replay the local payload against the now-known server state
    ApplyOffline,
    /// Discard the local write and adopt the server snapshot
    AcceptServer,
}

/// A detected mismatch between a mutation's baseline and the server's
/// current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ConflictId,
    /// The mutation that triggered detection, retained for audit after the
    /// mutation leaves the active queue
    pub mutation_id: MutationId,
    #[serde(flatten)]
    pub key: EntityKey,
    /// Replay coordinates of the original mutation, kept so `applyOffline`
    /// can rebuild a replayable mutation
    pub endpoint: String,
    pub method: Method,
    /// The payload the user intended to apply
    pub local_payload: serde_json::Value,
    pub server_snapshot: ServerSnapshot,
    pub detected_at: Timestamp,
    pub status: ConflictStatus,
}

impl Conflict {
    /// Whether the conflict still awaits resolution.
    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}
