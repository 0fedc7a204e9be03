//! Queued mutation types.
//!
//! Offline writes are expressed as replayable mutations, not direct network
//! calls. Each mutation carries enough information to be sent to the server
//! later: endpoint, method, payload, and the version marker observed when the
//! write intent was created.

use crate::{EntityId, EntityKey, Error, MutationId, Result, Timestamp, VersionMarker};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP-style method used to replay a mutation. The engine does not interpret
/// it beyond forwarding to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    /// Waiting to be replayed
    Pending,
    /// Sent to the server, outcome not yet recorded
    InFlight,
    /// Stale-write detected; moved to the conflict registry
    Conflicted,
    /// Retry ceiling exceeded; kept for manual retry
    Failed,
}

/// A durable write intent awaiting replay against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Locally assigned id from a persisted monotonic counter; defines
    /// submission order
    pub id: MutationId,
    /// Target entity
    #[serde(flatten)]
    pub key: EntityKey,
    /// How to replay against the server
    pub endpoint: String,
    pub method: Method,
    /// Data to send on replay
    pub payload: serde_json::Value,
    /// Version marker observed when the mutation was created. `None` for
    /// mutations not conditioned on a prior read; those are never conflict
    /// candidates.
    pub baseline_version: Option<VersionMarker>,
    pub status: MutationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
}

/// Input for enqueueing a mutation, supplied by a UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub endpoint: String,
    pub method: Method,
    pub payload: serde_json::Value,
    pub baseline_version: Option<VersionMarker>,
}

impl MutationRequest {
    /// Create a request without a baseline (replayed unconditionally).
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: EntityId,
        endpoint: impl Into<String>,
        method: Method,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            endpoint: endpoint.into(),
            method,
            payload,
            baseline_version: None,
        }
    }

    /// Condition the replay on the given baseline version.
    pub fn with_baseline(mut self, baseline: impl Into<VersionMarker>) -> Self {
        self.baseline_version = Some(baseline.into());
        self
    }

    /// The entity this request targets.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id)
    }

    /// Validate the request before it enters the queue.
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "entity type must not be empty".into(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::InvalidRequest("endpoint must not be empty".into()));
        }
        Ok(())
    }
}
