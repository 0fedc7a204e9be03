//! Entity snapshot types for offline reads.

use crate::{EntityId, Timestamp, VersionMarker};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a business object: kind plus id, unique within the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    /// Kind of business object (e.g. "maintenance_call", "materials")
    pub entity_type: String,
    /// Identifier, unique within `entity_type`
    pub entity_id: EntityId,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(entity_type: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }

    /// Check the key against optional type/id filters.
    pub fn matches(&self, entity_type: Option<&str>, entity_id: Option<EntityId>) -> bool {
        entity_type.map_or(true, |t| self.entity_type == t)
            && entity_id.map_or(true, |id| self.entity_id == id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// Last known full representation of an entity, used for render-while-offline
/// and as the basis for optimistic updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// The entity this snapshot belongs to
    #[serde(flatten)]
    pub key: EntityKey,
    /// Full entity representation, opaque to the engine
    pub payload: serde_json::Value,
    /// When this snapshot was last written, local or server-confirmed
    pub cached_at: Timestamp,
    /// Server-asserted "last modified" marker as of `payload`.
    /// `None` means the snapshot is purely optimistic.
    pub version_marker: Option<VersionMarker>,
}

impl EntitySnapshot {
    /// Create a snapshot.
    pub fn new(
        key: EntityKey,
        payload: serde_json::Value,
        cached_at: Timestamp,
        version_marker: Option<VersionMarker>,
    ) -> Self {
        Self {
            key,
            payload,
            cached_at,
            version_marker,
        }
    }

    /// Whether the snapshot was ever confirmed by the server.
    pub fn is_confirmed(&self) -> bool {
        self.version_marker.is_some()
    }
}
