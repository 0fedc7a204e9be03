//! The transport seam between the drain loop and the server.
//!
//! The engine never talks to the network directly; it hands replay requests
//! to a [`Transport`] and interprets the classified outcome. This keeps the
//! drain logic deterministic and testable against scripted transports.

use crate::{Method, VersionMarker};
use std::future::Future;
use thiserror::Error;

/// A mutation handed to the transport for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayRequest<'a> {
    pub endpoint: &'a str,
    pub method: Method,
    pub payload: &'a serde_json::Value,
    /// Version marker the mutation is conditioned on, if any
    pub baseline_version: Option<&'a str>,
}

/// Classified outcome of a replay that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayResponse {
    /// The server accepted the mutation
    Applied {
        /// Server's confirmed representation of the entity
        payload: serde_json::Value,
        /// Version marker after the write
        version_marker: VersionMarker,
    },
    /// The server rejected the mutation as a stale write
    VersionMismatch {
        /// Server's current representation of the entity
        server_payload: serde_json::Value,
        /// Version marker the server currently holds
        server_version: VersionMarker,
    },
}

/// A replay that did not produce a definitive outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Worth retrying: network failure, timeout, server overload
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Permanent: the server understood the request and refused it for a
    /// reason unrelated to versioning. Retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// How mutations reach the server.
pub trait Transport: Send + Sync {
    /// Replay a single mutation against the server.
    fn replay(
        &self,
        request: ReplayRequest<'_>,
    ) -> impl Future<Output = Result<ReplayResponse, TransportError>> + Send;

    /// Cheap reachability check used to confirm reported connectivity before
    /// a drain starts. The default assumes reachable.
    fn probe(&self) -> impl Future<Output = bool> + Send {
        async { true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = TransportError::Transient("connection reset".into());
        assert_eq!(
            err.to_string(),
            "transient transport failure: connection reset"
        );

        let err = TransportError::Rejected("validation failed".into());
        assert_eq!(err.to_string(), "request rejected: validation failed");
    }
}
