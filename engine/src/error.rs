//! Error types for the offline engine.

use crate::{ConflictId, EntityKey, MutationId};
use thiserror::Error;

/// All possible errors from the offline engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The durable storage medium is inaccessible (quota, corruption, IO).
    /// The engine degrades to memory-only operation instead of crashing.
    #[error("offline storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid store snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("mutation not found: {0}")]
    MutationNotFound(MutationId),

    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// Resolution is irreversible; a second resolve call is rejected,
    /// never double-applied.
    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(ConflictId),

    #[error("entity already has an open conflict: {0}")]
    ConflictAlreadyOpen(EntityKey),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MutationNotFound(7);
        assert_eq!(err.to_string(), "mutation not found: 7");

        let err = Error::ConflictAlreadyOpen(EntityKey::new("maintenance_call", 42));
        assert_eq!(
            err.to_string(),
            "entity already has an open conflict: maintenance_call#42"
        );

        let err = Error::StorageUnavailable("quota exceeded".into());
        assert_eq!(
            err.to_string(),
            "offline storage unavailable: quota exceeded"
        );
    }
}
