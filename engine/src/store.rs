//! The offline store: snapshot cache, mutation queue, and conflict registry.
//!
//! This is the only mutable shared state in the engine. All mutation happens
//! through the narrow contract below, so the invariants (single in-flight
//! mutation per entity, at most one open conflict per entity, per-entity
//! submission order) are enforced centrally rather than by convention in
//! callers.
//!
//! The store is pure and deterministic: no IO, no clock reads. Callers pass
//! `now` explicitly and persist the state through [`crate::persist`].

use crate::{
    Conflict, ConflictId, ConflictStatus, EntityId, EntityKey, EntitySnapshot, Error,
    MutationId, MutationRequest, MutationStatus, QueuedMutation, ResolutionAction, Result,
    ServerSnapshot, Timestamp, VersionMarker,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Count of non-terminal queue entries, for the "syncing" UI affordance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
}

impl QueueDepth {
    /// Total entries awaiting a terminal outcome.
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.failed
    }
}

/// Outcome of a conflict resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The conflict in its resolved state
    pub conflict: Conflict,
    /// The forced-replay mutation created by `applyOffline`
    pub requeued: Option<MutationId>,
}

/// Durable offline state behind a narrow contract.
#[derive(Debug, Clone)]
pub struct OfflineStore {
    snapshots: HashMap<EntityKey, EntitySnapshot>,
    /// Replayable queue in drain order. Ordinary enqueues append, so drain
    /// order equals id order; the forced replay built by `applyOffline` is
    /// the single exception (inserted ahead of held-back mutations).
    queue: Vec<QueuedMutation>,
    conflicts: Vec<Conflict>,
    next_mutation_id: MutationId,
    next_conflict_id: ConflictId,
}

impl Default for OfflineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            queue: Vec::new(),
            conflicts: Vec::new(),
            next_mutation_id: 1,
            next_conflict_id: 1,
        }
    }

    // ------------------------------------------------------------------
    // Entity snapshot store
    // ------------------------------------------------------------------

    /// Write a snapshot. Last-writer-wins per key.
    pub fn put_snapshot(
        &mut self,
        key: EntityKey,
        payload: serde_json::Value,
        version_marker: Option<VersionMarker>,
        now: Timestamp,
    ) {
        let snapshot = EntitySnapshot::new(key.clone(), payload, now, version_marker);
        self.snapshots.insert(key, snapshot);
    }

    /// Read the last known snapshot for an entity.
    pub fn get_snapshot(&self, key: &EntityKey) -> Option<&EntitySnapshot> {
        self.snapshots.get(key)
    }

    /// Remove a cached snapshot.
    pub fn remove_snapshot(&mut self, key: &EntityKey) -> Option<EntitySnapshot> {
        self.snapshots.remove(key)
    }

    /// Count of cached snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    // ------------------------------------------------------------------
    // Mutation queue store
    // ------------------------------------------------------------------

    /// Append a mutation to the queue and return its id.
    pub fn enqueue(&mut self, request: MutationRequest, now: Timestamp) -> MutationId {
        let id = self.alloc_mutation_id();
        self.queue.push(QueuedMutation {
            id,
            key: request.key(),
            endpoint: request.endpoint,
            method: request.method,
            payload: request.payload,
            baseline_version: request.baseline_version,
            status: MutationStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
        });
        id
    }

    /// Pending mutations in drain order, optionally filtered by entity.
    pub fn list_pending(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<EntityId>,
    ) -> Vec<&QueuedMutation> {
        self.queue
            .iter()
            .filter(|m| m.status == MutationStatus::Pending)
            .filter(|m| m.key.matches(entity_type, entity_id))
            .collect()
    }

    /// Look up a mutation by id.
    pub fn mutation(&self, id: MutationId) -> Option<&QueuedMutation> {
        self.queue.iter().find(|m| m.id == id)
    }

    fn mutation_mut(&mut self, id: MutationId) -> Result<&mut QueuedMutation> {
        self.queue
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(Error::MutationNotFound(id))
    }

    /// Transition a mutation's status, recording the last error if any.
    pub fn update_status(
        &mut self,
        id: MutationId,
        status: MutationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mutation = self.mutation_mut(id)?;
        mutation.status = status;
        if error.is_some() {
            mutation.last_error = error;
        }
        Ok(())
    }

    /// Record a transient delivery failure: bump the retry counter and put
    /// the mutation back to `pending`. Returns the new retry count.
    pub fn record_retry(&mut self, id: MutationId, error: String) -> Result<u32> {
        let mutation = self.mutation_mut(id)?;
        mutation.retry_count += 1;
        mutation.status = MutationStatus::Pending;
        mutation.last_error = Some(error);
        Ok(mutation.retry_count)
    }

    /// Manual retry of a `failed` mutation: back to `pending`, counter reset.
    pub fn retry_failed(&mut self, id: MutationId) -> Result<()> {
        let mutation = self.mutation_mut(id)?;
        if mutation.status != MutationStatus::Failed {
            return Err(Error::InvalidRequest(format!(
                "mutation {id} is not in failed state"
            )));
        }
        mutation.status = MutationStatus::Pending;
        mutation.retry_count = 0;
        Ok(())
    }

    /// Remove a mutation from the queue.
    pub fn remove_mutation(&mut self, id: MutationId) -> Result<QueuedMutation> {
        let index = self
            .queue
            .iter()
            .position(|m| m.id == id)
            .ok_or(Error::MutationNotFound(id))?;
        Ok(self.queue.remove(index))
    }

    /// Record a confirmed replay: write the server-confirmed snapshot, drop
    /// the mutation from the queue, and rebase later pending mutations for
    /// the same entity onto the new version. Chained offline mutations were
    /// constructed against the version observed before any of them applied,
    /// so without the rebase every mutation after the first would be a
    /// spurious stale-write.
    pub fn apply_success(
        &mut self,
        id: MutationId,
        payload: serde_json::Value,
        version_marker: VersionMarker,
        now: Timestamp,
    ) -> Result<QueuedMutation> {
        let mutation = self.remove_mutation(id)?;
        self.put_snapshot(
            mutation.key.clone(),
            payload,
            Some(version_marker.clone()),
            now,
        );
        self.rebase_pending(&mutation.key, &version_marker);
        Ok(mutation)
    }

    fn rebase_pending(&mut self, key: &EntityKey, version_marker: &VersionMarker) {
        for mutation in self.queue.iter_mut() {
            if mutation.key == *key
                && mutation.status == MutationStatus::Pending
                && mutation.baseline_version.is_some()
            {
                mutation.baseline_version = Some(version_marker.clone());
            }
        }
    }

    /// Queue depth broken down by non-terminal status.
    pub fn depth(&self) -> QueueDepth {
        let mut depth = QueueDepth::default();
        for mutation in &self.queue {
            match mutation.status {
                MutationStatus::Pending => depth.pending += 1,
                MutationStatus::InFlight => depth.in_flight += 1,
                MutationStatus::Failed => depth.failed += 1,
                MutationStatus::Conflicted => {}
            }
        }
        depth
    }

    fn alloc_mutation_id(&mut self) -> MutationId {
        let id = self.next_mutation_id;
        self.next_mutation_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Conflict registry
    // ------------------------------------------------------------------

    /// Whether the entity has an unresolved conflict.
    pub fn has_open_conflict(&self, key: &EntityKey) -> bool {
        self.conflicts.iter().any(|c| c.is_open() && c.key == *key)
    }

    /// Entities that must not be drained: keys with an open conflict, plus
    /// keys whose earliest queued mutation is `failed` (later mutations were
    /// constructed assuming the earlier one applied).
    pub fn blocked_keys(&self) -> HashSet<EntityKey> {
        let mut blocked: HashSet<EntityKey> = self
            .conflicts
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.key.clone())
            .collect();

        let mut seen: HashSet<&EntityKey> = HashSet::new();
        for mutation in &self.queue {
            if seen.insert(&mutation.key) && mutation.status == MutationStatus::Failed {
                blocked.insert(mutation.key.clone());
            }
        }
        blocked
    }

    /// Register a conflict for a queued mutation. The mutation transitions to
    /// `conflicted` and leaves the active queue; the conflict record keeps
    /// everything needed for audit and forced replay.
    pub fn register_conflict(
        &mut self,
        mutation_id: MutationId,
        server_payload: serde_json::Value,
        server_version: VersionMarker,
        now: Timestamp,
    ) -> Result<ConflictId> {
        let key = self
            .mutation(mutation_id)
            .ok_or(Error::MutationNotFound(mutation_id))?
            .key
            .clone();
        if self.has_open_conflict(&key) {
            return Err(Error::ConflictAlreadyOpen(key));
        }

        self.update_status(mutation_id, MutationStatus::Conflicted, None)?;
        let mutation = self.remove_mutation(mutation_id)?;

        let id = self.next_conflict_id;
        self.next_conflict_id += 1;
        self.conflicts.push(Conflict {
            id,
            mutation_id,
            key: mutation.key,
            endpoint: mutation.endpoint,
            method: mutation.method,
            local_payload: mutation.payload,
            server_snapshot: ServerSnapshot {
                payload: server_payload,
                version_marker: server_version,
            },
            detected_at: now,
            status: ConflictStatus::Open,
        });
        Ok(id)
    }

    /// Open conflicts in detection order, optionally filtered by entity.
    pub fn open_conflicts(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<EntityId>,
    ) -> Vec<&Conflict> {
        self.conflicts
            .iter()
            .filter(|c| c.is_open())
            .filter(|c| c.key.matches(entity_type, entity_id))
            .collect()
    }

    /// Look up a conflict by id, resolved or open.
    pub fn conflict(&self, id: ConflictId) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    /// Count of open conflicts.
    pub fn open_conflict_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_open()).count()
    }

    /// Resolve a conflict. Atomic with the blocked-queue release: the status
    /// change, the re-enqueue or snapshot write, and the unblocking all
    /// happen in this single call.
    ///
    /// `applyOffline` re-enqueues the local payload with the baseline set to
    /// the server's version at detection time, positioned ahead of any
    /// held-back mutations for the entity so the forced replay completes
    /// first. `acceptServer` adopts the server snapshot and rebases held-back
    /// mutations onto the accepted version.
    pub fn resolve(
        &mut self,
        id: ConflictId,
        action: ResolutionAction,
        now: Timestamp,
    ) -> Result<Resolution> {
        let index = self
            .conflicts
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::ConflictNotFound(id))?;
        if !self.conflicts[index].is_open() {
            return Err(Error::ConflictAlreadyResolved(id));
        }

        let conflict = self.conflicts[index].clone();
        let requeued = match action {
            ResolutionAction::ApplyOffline => {
                let mutation_id = self.alloc_mutation_id();
                let forced = QueuedMutation {
                    id: mutation_id,
                    key: conflict.key.clone(),
                    endpoint: conflict.endpoint.clone(),
                    method: conflict.method,
                    payload: conflict.local_payload.clone(),
                    baseline_version: Some(conflict.server_snapshot.version_marker.clone()),
                    status: MutationStatus::Pending,
                    retry_count: 0,
                    last_error: None,
                    created_at: now,
                };
                let position = self
                    .queue
                    .iter()
                    .position(|m| m.key == conflict.key)
                    .unwrap_or(self.queue.len());
                self.queue.insert(position, forced);
                self.conflicts[index].status = ConflictStatus::ResolvedApplyOffline;
                Some(mutation_id)
            }
            ResolutionAction::AcceptServer => {
                self.put_snapshot(
                    conflict.key.clone(),
                    conflict.server_snapshot.payload.clone(),
                    Some(conflict.server_snapshot.version_marker.clone()),
                    now,
                );
                self.rebase_pending(&conflict.key, &conflict.server_snapshot.version_marker);
                self.conflicts[index].status = ConflictStatus::ResolvedAcceptServer;
                None
            }
        };

        Ok(Resolution {
            conflict: self.conflicts[index].clone(),
            requeued,
        })
    }

    // ------------------------------------------------------------------
    // Durability image
    // ------------------------------------------------------------------

    /// Export the full state for persistence.
    pub fn export_state(&self) -> crate::persist::StoreSnapshot {
        let mut snapshots: Vec<EntitySnapshot> = self.snapshots.values().cloned().collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        crate::persist::StoreSnapshot {
            format_version: crate::persist::STORE_FORMAT_VERSION,
            snapshots,
            queue: self.queue.clone(),
            conflicts: self.conflicts.clone(),
            next_mutation_id: self.next_mutation_id,
            next_conflict_id: self.next_conflict_id,
        }
    }

    /// Rebuild a store from a persisted image. `inFlight` entries are an
    /// unknown outcome from a previous session and are reset to `pending`
    /// for re-send.
    pub fn from_snapshot(snapshot: crate::persist::StoreSnapshot) -> Self {
        let mut queue = snapshot.queue;
        for mutation in queue.iter_mut() {
            if mutation.status == MutationStatus::InFlight {
                mutation.status = MutationStatus::Pending;
            }
        }
        Self {
            snapshots: snapshot
                .snapshots
                .into_iter()
                .map(|s| (s.key.clone(), s))
                .collect(),
            queue,
            conflicts: snapshot.conflicts,
            next_mutation_id: snapshot.next_mutation_id,
            next_conflict_id: snapshot.next_conflict_id,
        }
    }
}

/// Lock the shared store, recovering from a poisoned mutex (the store has no
/// invalid intermediate states observable across a panic boundary).
pub(crate) fn lock(store: &Mutex<OfflineStore>) -> MutexGuard<'_, OfflineStore> {
    store.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use serde_json::json;

    fn call_update(entity_id: EntityId, baseline: Option<&str>) -> MutationRequest {
        let mut request = MutationRequest::new(
            "maintenance_call",
            entity_id,
            format!("/calls/{entity_id}"),
            Method::Put,
            json!({"status": "paused"}),
        );
        if let Some(baseline) = baseline {
            request = request.with_baseline(baseline);
        }
        request
    }

    #[test]
    fn snapshot_last_writer_wins() {
        let mut store = OfflineStore::new();
        let key = EntityKey::new("maintenance_call", 42);

        store.put_snapshot(key.clone(), json!({"status": "open"}), Some("v1".into()), 100);
        store.put_snapshot(key.clone(), json!({"status": "paused"}), None, 200);

        let snapshot = store.get_snapshot(&key).unwrap();
        assert_eq!(snapshot.payload, json!({"status": "paused"}));
        assert_eq!(snapshot.cached_at, 200);
        assert!(!snapshot.is_confirmed());
        assert_eq!(store.snapshot_count(), 1);
    }

    #[test]
    fn enqueue_assigns_monotonic_ids() {
        let mut store = OfflineStore::new();

        let a = store.enqueue(call_update(1, Some("v1")), 100);
        let b = store.enqueue(call_update(2, Some("v1")), 100);
        let c = store.enqueue(call_update(1, Some("v1")), 100);

        assert!(a < b && b < c);
        let pending: Vec<_> = store.list_pending(None, None).iter().map(|m| m.id).collect();
        assert_eq!(pending, vec![a, b, c]);

        let for_call_1: Vec<_> = store
            .list_pending(Some("maintenance_call"), Some(1))
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(for_call_1, vec![a, c]);
    }

    #[test]
    fn record_retry_returns_to_pending() {
        let mut store = OfflineStore::new();
        let id = store.enqueue(call_update(1, None), 100);

        store
            .update_status(id, MutationStatus::InFlight, None)
            .unwrap();
        let retries = store.record_retry(id, "timeout".into()).unwrap();

        assert_eq!(retries, 1);
        let mutation = store.mutation(id).unwrap();
        assert_eq!(mutation.status, MutationStatus::Pending);
        assert_eq!(mutation.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn retry_failed_requires_failed_state() {
        let mut store = OfflineStore::new();
        let id = store.enqueue(call_update(1, None), 100);

        assert!(matches!(
            store.retry_failed(id),
            Err(Error::InvalidRequest(_))
        ));

        store
            .update_status(id, MutationStatus::Failed, Some("gave up".into()))
            .unwrap();
        store.retry_failed(id).unwrap();

        let mutation = store.mutation(id).unwrap();
        assert_eq!(mutation.status, MutationStatus::Pending);
        assert_eq!(mutation.retry_count, 0);
    }

    #[test]
    fn apply_success_confirms_snapshot_and_rebases() {
        let mut store = OfflineStore::new();
        let key = EntityKey::new("maintenance_call", 7);

        // Two chained mutations, both constructed against v1
        let a = store.enqueue(call_update(7, Some("v1")), 100);
        let b = store.enqueue(call_update(7, Some("v1")), 101);
        // Unconditional mutation stays unconditioned
        let c = store.enqueue(call_update(7, None), 102);

        store
            .apply_success(a, json!({"status": "paused", "updated_at": "v2"}), "v2".into(), 200)
            .unwrap();

        assert!(store.mutation(a).is_none());
        assert_eq!(
            store.mutation(b).unwrap().baseline_version.as_deref(),
            Some("v2")
        );
        assert_eq!(store.mutation(c).unwrap().baseline_version, None);

        let snapshot = store.get_snapshot(&key).unwrap();
        assert_eq!(snapshot.version_marker.as_deref(), Some("v2"));
    }

    #[test]
    fn register_conflict_moves_mutation_out_of_queue() {
        let mut store = OfflineStore::new();
        let id = store.enqueue(call_update(42, Some("v1")), 100);

        let conflict_id = store
            .register_conflict(id, json!({"status": "closed"}), "v2".into(), 200)
            .unwrap();

        assert!(store.mutation(id).is_none());
        assert_eq!(store.depth(), QueueDepth::default());

        let conflict = store.conflict(conflict_id).unwrap();
        assert!(conflict.is_open());
        assert_eq!(conflict.mutation_id, id);
        assert_eq!(conflict.server_snapshot.version_marker, "v2");
        assert_eq!(conflict.local_payload, json!({"status": "paused"}));
    }

    #[test]
    fn one_open_conflict_per_entity() {
        let mut store = OfflineStore::new();
        let a = store.enqueue(call_update(42, Some("v1")), 100);
        let b = store.enqueue(call_update(42, Some("v1")), 101);

        store
            .register_conflict(a, json!({}), "v2".into(), 200)
            .unwrap();
        let result = store.register_conflict(b, json!({}), "v2".into(), 200);

        assert!(matches!(result, Err(Error::ConflictAlreadyOpen(_))));
        // The second mutation is still held in the queue
        assert_eq!(store.mutation(b).unwrap().status, MutationStatus::Pending);
    }

    #[test]
    fn blocked_keys_cover_conflicts_and_failed_heads() {
        let mut store = OfflineStore::new();

        let a = store.enqueue(call_update(1, Some("v1")), 100);
        store.enqueue(call_update(1, Some("v1")), 101);
        store
            .register_conflict(a, json!({}), "v2".into(), 200)
            .unwrap();

        let c = store.enqueue(call_update(2, None), 102);
        store.enqueue(call_update(2, None), 103);
        store
            .update_status(c, MutationStatus::Failed, Some("gave up".into()))
            .unwrap();

        store.enqueue(call_update(3, None), 104);

        let blocked = store.blocked_keys();
        assert!(blocked.contains(&EntityKey::new("maintenance_call", 1)));
        assert!(blocked.contains(&EntityKey::new("maintenance_call", 2)));
        assert!(!blocked.contains(&EntityKey::new("maintenance_call", 3)));
    }

    #[test]
    fn resolve_apply_offline_requeues_ahead_of_held_mutations() {
        let mut store = OfflineStore::new();
        let a = store.enqueue(call_update(42, Some("v1")), 100);
        let b = store.enqueue(call_update(42, Some("v1")), 101);
        let conflict_id = store
            .register_conflict(a, json!({"status": "closed"}), "v2".into(), 200)
            .unwrap();

        let resolution = store
            .resolve(conflict_id, ResolutionAction::ApplyOffline, 300)
            .unwrap();
        let forced = resolution.requeued.unwrap();

        assert_eq!(
            resolution.conflict.status,
            ConflictStatus::ResolvedApplyOffline
        );
        // Forced replay carries the local payload, rebased onto the server version
        let mutation = store.mutation(forced).unwrap();
        assert_eq!(mutation.payload, json!({"status": "paused"}));
        assert_eq!(mutation.baseline_version.as_deref(), Some("v2"));

        // And it drains before the held-back mutation despite the higher id
        let order: Vec<_> = store
            .list_pending(Some("maintenance_call"), Some(42))
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(order, vec![forced, b]);
        assert!(forced > b);

        assert!(!store.has_open_conflict(&EntityKey::new("maintenance_call", 42)));
    }

    #[test]
    fn resolve_accept_server_adopts_snapshot_and_rebases() {
        let mut store = OfflineStore::new();
        let key = EntityKey::new("maintenance_call", 42);
        store.put_snapshot(key.clone(), json!({"status": "paused"}), None, 100);

        let a = store.enqueue(call_update(42, Some("v1")), 100);
        let b = store.enqueue(call_update(42, Some("v1")), 101);
        let conflict_id = store
            .register_conflict(a, json!({"status": "closed"}), "v2".into(), 200)
            .unwrap();

        let resolution = store
            .resolve(conflict_id, ResolutionAction::AcceptServer, 300)
            .unwrap();

        assert_eq!(
            resolution.conflict.status,
            ConflictStatus::ResolvedAcceptServer
        );
        assert!(resolution.requeued.is_none());

        // Snapshot store holds exactly the server snapshot
        let snapshot = store.get_snapshot(&key).unwrap();
        assert_eq!(snapshot.payload, json!({"status": "closed"}));
        assert_eq!(snapshot.version_marker.as_deref(), Some("v2"));

        // Held-back mutation replays against the accepted baseline
        assert_eq!(
            store.mutation(b).unwrap().baseline_version.as_deref(),
            Some("v2")
        );
        assert!(!store.has_open_conflict(&key));
    }

    #[test]
    fn resolve_twice_is_rejected() {
        let mut store = OfflineStore::new();
        let a = store.enqueue(call_update(42, Some("v1")), 100);
        let conflict_id = store
            .register_conflict(a, json!({}), "v2".into(), 200)
            .unwrap();

        store
            .resolve(conflict_id, ResolutionAction::AcceptServer, 300)
            .unwrap();
        let second = store.resolve(conflict_id, ResolutionAction::ApplyOffline, 301);

        assert!(matches!(second, Err(Error::ConflictAlreadyResolved(_))));
        // Not double-applied: no forced replay was enqueued
        assert!(store.list_pending(None, None).is_empty());
    }

    #[test]
    fn resolve_unknown_conflict() {
        let mut store = OfflineStore::new();
        assert!(matches!(
            store.resolve(99, ResolutionAction::AcceptServer, 0),
            Err(Error::ConflictNotFound(99))
        ));
    }

    #[test]
    fn depth_counts_by_status() {
        let mut store = OfflineStore::new();
        let a = store.enqueue(call_update(1, None), 100);
        store.enqueue(call_update(2, None), 100);
        let c = store.enqueue(call_update(3, None), 100);

        store
            .update_status(a, MutationStatus::InFlight, None)
            .unwrap();
        store
            .update_status(c, MutationStatus::Failed, Some("gave up".into()))
            .unwrap();

        let depth = store.depth();
        assert_eq!(depth.pending, 1);
        assert_eq!(depth.in_flight, 1);
        assert_eq!(depth.failed, 1);
        assert_eq!(depth.total(), 3);
    }

    #[test]
    fn export_import_roundtrip_resets_in_flight() {
        let mut store = OfflineStore::new();
        store.put_snapshot(
            EntityKey::new("materials", 5),
            json!({"qty": 3}),
            Some("v1".into()),
            100,
        );
        let a = store.enqueue(call_update(1, Some("v1")), 100);
        let b = store.enqueue(call_update(2, None), 101);
        store
            .update_status(a, MutationStatus::InFlight, None)
            .unwrap();
        store
            .register_conflict(b, json!({}), "v2".into(), 200)
            .unwrap();

        let image = store.export_state();
        let restored = OfflineStore::from_snapshot(image);

        // Unknown outcome from the previous session is re-sent
        assert_eq!(
            restored.mutation(a).unwrap().status,
            MutationStatus::Pending
        );
        assert_eq!(restored.open_conflict_count(), 1);
        assert!(restored
            .get_snapshot(&EntityKey::new("materials", 5))
            .is_some());

        // Counter continuity: new ids stay monotonic after restore
        let mut restored = restored;
        let next = store.enqueue(call_update(9, None), 300);
        let next_restored = restored.enqueue(call_update(9, None), 300);
        assert_eq!(next, next_restored);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pending_order_is_submission_order(
                targets in proptest::collection::vec(1i64..4, 1..30),
            ) {
                let mut store = OfflineStore::new();
                let mut ids = Vec::new();
                for target in targets {
                    ids.push(store.enqueue(call_update(target, Some("v1")), 100));
                }

                // Ids are strictly monotonic and list_pending preserves them
                prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
                let listed: Vec<_> = store
                    .list_pending(None, None)
                    .iter()
                    .map(|m| m.id)
                    .collect();
                prop_assert_eq!(listed, ids);
            }

            #[test]
            fn successes_in_order_leave_rebased_queue(
                count in 2usize..10,
            ) {
                let mut store = OfflineStore::new();
                let mut ids = Vec::new();
                for _ in 0..count {
                    ids.push(store.enqueue(call_update(7, Some("v0")), 100));
                }

                // Replay the head repeatedly; each success rebases the rest
                for (step, id) in ids.iter().enumerate() {
                    let head: Vec<_> = store
                        .list_pending(Some("maintenance_call"), Some(7))
                        .iter()
                        .map(|m| m.id)
                        .collect();
                    prop_assert_eq!(head[0], *id);
                    let version = format!("v{}", step + 1);
                    store
                        .apply_success(*id, serde_json::json!({}), version.clone(), 200)
                        .unwrap();
                    for remaining in store.list_pending(None, None) {
                        prop_assert_eq!(
                            remaining.baseline_version.as_deref(),
                            Some(version.as_str())
                        );
                    }
                }
                prop_assert!(store.list_pending(None, None).is_empty());
            }
        }
    }
}
