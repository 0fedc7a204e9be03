//! Offline mutation queue and conflict reconciliation for field-service
//! clients.
//!
//! The engine lets a client keep working against a REST backend through
//! connectivity loss: entity reads are served from a local snapshot cache,
//! writes become durable queued mutations, and a background loop replays the
//! queue when the server is reachable again. Stale writes detected by the
//! server become first-class [`Conflict`]s that wait for an explicit
//! resolution (`applyOffline` or `acceptServer`) instead of being silently
//! merged.
//!
//! ```no_run
//! use sgm_offline_engine::{
//!     FileBackend, HttpTransport, Method, MutationRequest, SyncConfig, SyncEngine,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> sgm_offline_engine::Result<()> {
//! let transport = HttpTransport::new("https://api.example.com")?;
//! let backend = FileBackend::new("/var/lib/app/offline.json");
//! let engine = Arc::new(SyncEngine::new(transport, backend, SyncConfig::default()));
//! Arc::clone(&engine).spawn();
//!
//! engine.enqueue_mutation(
//!     MutationRequest::new(
//!         "maintenance_call",
//!         42,
//!         "/calls/42",
//!         Method::Put,
//!         serde_json::json!({"status": "paused"}),
//!     )
//!     .with_baseline("2026-08-24T10:00:00Z"),
//! )?;
//! # Ok(())
//! # }
//! ```

mod conflict;
mod connectivity;
mod entity;
mod error;
mod http;
mod mutation;
pub mod persist;
mod store;
mod sync;
mod transport;
mod watch;

pub use conflict::{Conflict, ConflictStatus, ResolutionAction, ServerSnapshot};
pub use connectivity::ConnectivityMonitor;
pub use entity::{EntityKey, EntitySnapshot};
pub use error::{Error, Result};
pub use http::HttpTransport;
pub use mutation::{Method, MutationRequest, MutationStatus, QueuedMutation};
pub use persist::{FileBackend, MemoryBackend, StorageBackend, StoreSnapshot};
pub use store::{OfflineStore, QueueDepth, Resolution};
pub use sync::{DrainReport, SyncConfig, SyncEngine};
pub use transport::{ReplayRequest, ReplayResponse, Transport, TransportError};
pub use watch::{ConflictWatch, SyncStatus};

/// Identifier of a business entity, unique within its type.
pub type EntityId = i64;

/// Locally assigned mutation id; defines submission order.
pub type MutationId = u64;

/// Locally assigned conflict id.
pub type ConflictId = u64;

/// Opaque server-asserted "last modified" marker.
pub type VersionMarker = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
