//! The sync engine: queue facade, background drain loop, and conflict
//! resolution entry points.
//!
//! Delivery ordering: mutations for the same entity replay strictly in
//! submission order, one at a time; mutations for different entities drain
//! concurrently up to `max_in_flight`. An entity with an open conflict or a
//! failed head mutation is held back entirely until the user acts.

use crate::{
    persist::{StorageBackend, StoreSnapshot},
    store, Conflict, ConflictId, ConflictWatch, ConnectivityMonitor, EntityId, EntityKey,
    EntitySnapshot, MutationId, MutationRequest, MutationStatus, OfflineStore, QueueDepth,
    QueuedMutation, ReplayRequest, ReplayResponse, Resolution, ResolutionAction, Result,
    SyncStatus, Timestamp, Transport, TransportError, VersionMarker,
};
use futures::{stream, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Tunables for the drain loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Transient failures tolerated per mutation before it goes `failed`
    pub retry_ceiling: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub backoff_cap: Duration,
    /// Entities drained concurrently
    pub max_in_flight: usize,
    /// Periodic re-drain interval while online
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            max_in_flight: 4,
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Tally of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Replay attempts handed to the transport
    pub attempted: usize,
    pub succeeded: usize,
    pub conflicted: usize,
    pub failed: usize,
    /// Permanently rejected and dropped from the queue
    pub rejected: usize,
    /// Left pending because connectivity was lost mid-drain
    pub aborted: usize,
}

impl DrainReport {
    fn merge(mut self, other: DrainReport) -> Self {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.conflicted += other.conflicted;
        self.failed += other.failed;
        self.rejected += other.rejected;
        self.aborted += other.aborted;
        self
    }
}

/// The offline engine: snapshot cache, durable mutation queue, conflict
/// registry, and the background loop that drains the queue when online.
pub struct SyncEngine<T: Transport, B: StorageBackend> {
    store: Arc<Mutex<OfflineStore>>,
    transport: T,
    backend: B,
    monitor: ConnectivityMonitor,
    config: SyncConfig,
    revision_tx: watch::Sender<u64>,
    status_tx: watch::Sender<SyncStatus>,
    /// Held for the duration of a drain pass; a second drain request while
    /// one is running is a no-op
    drain_gate: tokio::sync::Mutex<()>,
    kick: Notify,
    shutdown_tx: watch::Sender<bool>,
    syncing: AtomicBool,
    degraded: AtomicBool,
    /// Session total of permanently rejected writes, surfaced through the
    /// status channel so a background drain leaves a visible trace
    rejected_total: AtomicUsize,
}

impl<T: Transport, B: StorageBackend> SyncEngine<T, B> {
    /// Create an engine, restoring persisted state from the backend. A
    /// corrupt or unreadable image is logged and replaced with an empty
    /// store rather than failing startup.
    pub fn new(transport: T, backend: B, config: SyncConfig) -> Self {
        let mut degraded = false;
        let store = match backend.load() {
            Ok(Some(data)) => match StoreSnapshot::from_json(&data) {
                Ok(image) => OfflineStore::from_snapshot(image),
                Err(err) => {
                    warn!(error = %err, "persisted offline state unreadable, starting empty");
                    OfflineStore::new()
                }
            },
            Ok(None) => OfflineStore::new(),
            Err(err) => {
                warn!(error = %err, "offline storage unavailable, running memory-only");
                degraded = true;
                OfflineStore::new()
            }
        };

        let monitor = ConnectivityMonitor::default();
        let initial = SyncStatus {
            is_online: monitor.is_online(),
            is_syncing: false,
            pending: store.depth().pending,
            in_flight: 0,
            failed: store.depth().failed,
            open_conflicts: store.open_conflict_count(),
            rejected: 0,
        };
        let (revision_tx, _) = watch::channel(0);
        let (status_tx, _) = watch::channel(initial);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            store: Arc::new(Mutex::new(store)),
            transport,
            backend,
            monitor,
            config,
            revision_tx,
            status_tx,
            drain_gate: tokio::sync::Mutex::new(()),
            kick: Notify::new(),
            shutdown_tx,
            syncing: AtomicBool::new(false),
            degraded: AtomicBool::new(degraded),
            rejected_total: AtomicUsize::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Entity snapshots
    // ------------------------------------------------------------------

    /// Last known snapshot of an entity.
    pub fn read_entity(&self, key: &EntityKey) -> Option<EntitySnapshot> {
        store::lock(&self.store).get_snapshot(key).cloned()
    }

    /// Cache an entity representation, optionally with its server-asserted
    /// version marker.
    pub fn cache_entity(
        &self,
        key: EntityKey,
        payload: serde_json::Value,
        version_marker: Option<VersionMarker>,
    ) {
        store::lock(&self.store).put_snapshot(key, payload, version_marker, now_ms());
        self.persist();
    }

    /// Drop a cached entity snapshot.
    pub fn remove_entity(&self, key: &EntityKey) -> Option<EntitySnapshot> {
        let removed = store::lock(&self.store).remove_snapshot(key);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    // ------------------------------------------------------------------
    // Mutation queue
    // ------------------------------------------------------------------

    /// Queue a mutation for replay. Persisted before returning; the replay
    /// attempt is kicked off in the background if online.
    pub fn enqueue_mutation(&self, request: MutationRequest) -> Result<MutationId> {
        request.validate()?;
        let id = store::lock(&self.store).enqueue(request, now_ms());
        self.persist();
        self.publish_status();
        debug!(mutation = id, "mutation queued");
        self.kick.notify_one();
        Ok(id)
    }

    /// Pending mutations, optionally filtered by entity.
    pub fn pending_mutations(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<EntityId>,
    ) -> Vec<QueuedMutation> {
        store::lock(&self.store)
            .list_pending(entity_type, entity_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Queue depth by status.
    pub fn queue_depth(&self) -> QueueDepth {
        store::lock(&self.store).depth()
    }

    /// Put a `failed` mutation back into rotation.
    pub fn retry_failed(&self, id: MutationId) -> Result<()> {
        store::lock(&self.store).retry_failed(id)?;
        self.persist();
        self.publish_status();
        self.kick.notify_one();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conflicts
    // ------------------------------------------------------------------

    /// Open conflicts, optionally filtered by entity.
    pub fn open_conflicts(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<EntityId>,
    ) -> Vec<Conflict> {
        store::lock(&self.store)
            .open_conflicts(entity_type, entity_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Subscribe to conflict registry changes, optionally scoped.
    pub fn watch_conflicts(
        &self,
        entity_type: Option<&str>,
        entity_id: Option<EntityId>,
    ) -> ConflictWatch {
        ConflictWatch::new(
            self.revision_tx.subscribe(),
            Arc::clone(&self.store),
            entity_type.map(str::to_string),
            entity_id,
        )
    }

    /// Resolve an open conflict. The decision, the snapshot or re-enqueue,
    /// and the release of held-back mutations commit atomically; a second
    /// resolution of the same conflict is rejected.
    pub fn resolve_conflict(
        &self,
        id: ConflictId,
        action: ResolutionAction,
    ) -> Result<Resolution> {
        let resolution = store::lock(&self.store).resolve(id, action, now_ms())?;
        self.persist();
        self.revision_tx.send_modify(|r| *r += 1);
        self.publish_status();
        info!(conflict = id, ?action, "conflict resolved");
        if resolution.requeued.is_some() {
            self.kick.notify_one();
        }
        Ok(resolution)
    }

    // ------------------------------------------------------------------
    // Status and connectivity
    // ------------------------------------------------------------------

    /// Current sync summary.
    pub fn status(&self) -> SyncStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to sync summary changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Report a connectivity observation. A reported recovery is confirmed
    /// with a transport probe before the engine believes it.
    pub async fn report_connectivity(&self, online: bool) {
        if online {
            if self.transport.probe().await {
                if self.monitor.set_online() {
                    info!("connectivity restored");
                    self.kick.notify_one();
                }
            } else {
                self.monitor.set_offline();
            }
        } else if self.monitor.set_offline() {
            info!("connectivity lost");
        }
        self.publish_status();
    }

    // ------------------------------------------------------------------
    // Drain loop
    // ------------------------------------------------------------------

    /// Drain the queue once: replay every eligible pending mutation, in
    /// order per entity, concurrently across entities. Concurrent calls
    /// coalesce into the already-running pass.
    pub async fn drain(&self) -> DrainReport {
        let Ok(_gate) = self.drain_gate.try_lock() else {
            return DrainReport::default();
        };

        self.syncing.store(true, Ordering::Relaxed);
        self.publish_status();

        // Stable snapshot of the pass: mutations enqueued mid-cycle (ids
        // above the cutoff) wait for the next pass
        let (keys, cutoff) = {
            let store = store::lock(&self.store);
            let blocked = store.blocked_keys();
            let mut keys = Vec::new();
            let mut cutoff = 0;
            for mutation in store.list_pending(None, None) {
                cutoff = cutoff.max(mutation.id);
                if !blocked.contains(&mutation.key) && !keys.contains(&mutation.key) {
                    keys.push(mutation.key.clone());
                }
            }
            (keys, cutoff)
        };

        let report = stream::iter(keys)
            .map(|key| self.drain_entity(key, cutoff))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .fold(DrainReport::default(), |acc, part| async move {
                acc.merge(part)
            })
            .await;

        self.syncing.store(false, Ordering::Relaxed);
        self.publish_status();
        if report != DrainReport::default() {
            debug!(?report, "drain pass finished");
        }
        report
    }

    /// Replay one entity's pending mutations in submission order. Stops at
    /// the first conflict or terminal failure; later mutations for the
    /// entity were constructed assuming the earlier ones applied.
    async fn drain_entity(&self, key: EntityKey, cutoff: MutationId) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            if !self.monitor.is_online() {
                report.aborted += self.pending_for(&key, cutoff);
                break;
            }
            let Some(mutation) = self.claim(&key, cutoff) else {
                break;
            };
            self.publish_status();
            report.attempted += 1;

            let outcome = self
                .transport
                .replay(ReplayRequest {
                    endpoint: &mutation.endpoint,
                    method: mutation.method,
                    payload: &mutation.payload,
                    baseline_version: mutation.baseline_version.as_deref(),
                })
                .await;

            match outcome {
                Ok(ReplayResponse::Applied {
                    payload,
                    version_marker,
                }) => {
                    let applied = store::lock(&self.store).apply_success(
                        mutation.id,
                        payload,
                        version_marker,
                        now_ms(),
                    );
                    if let Err(err) = applied {
                        warn!(mutation = mutation.id, error = %err, "confirmed mutation vanished from queue");
                    }
                    self.persist();
                    self.publish_status();
                    report.succeeded += 1;
                }
                Ok(ReplayResponse::VersionMismatch {
                    server_payload,
                    server_version,
                }) => {
                    if mutation.baseline_version.is_some() {
                        let registered = store::lock(&self.store).register_conflict(
                            mutation.id,
                            server_payload,
                            server_version,
                            now_ms(),
                        );
                        match registered {
                            Ok(conflict) => {
                                info!(
                                    mutation = mutation.id,
                                    conflict, entity = %key, "stale write, conflict registered"
                                );
                                self.revision_tx.send_modify(|r| *r += 1);
                                report.conflicted += 1;
                            }
                            Err(err) => {
                                warn!(mutation = mutation.id, error = %err, "conflict registration failed");
                                let _ = store::lock(&self.store).update_status(
                                    mutation.id,
                                    MutationStatus::Pending,
                                    None,
                                );
                            }
                        }
                    } else {
                        // Not conditioned on a prior read, so never a
                        // conflict candidate. Held for manual retry.
                        let _ = store::lock(&self.store).update_status(
                            mutation.id,
                            MutationStatus::Failed,
                            Some("server reported a version mismatch".into()),
                        );
                        report.failed += 1;
                    }
                    self.persist();
                    self.publish_status();
                    break;
                }
                Err(TransportError::Transient(reason)) => {
                    let retries = store::lock(&self.store)
                        .record_retry(mutation.id, reason.clone())
                        .unwrap_or(u32::MAX);
                    if retries > self.config.retry_ceiling {
                        warn!(
                            mutation = mutation.id,
                            retries, %reason, "retry ceiling reached, mutation failed"
                        );
                        let _ = store::lock(&self.store).update_status(
                            mutation.id,
                            MutationStatus::Failed,
                            Some(reason),
                        );
                        self.persist();
                        self.publish_status();
                        report.failed += 1;
                        break;
                    }
                    debug!(mutation = mutation.id, retries, %reason, "transient failure, backing off");
                    self.persist();
                    self.publish_status();
                    tokio::time::sleep(self.backoff(retries)).await;
                }
                Err(TransportError::Rejected(reason)) => {
                    warn!(mutation = mutation.id, %reason, "mutation permanently rejected, dropping");
                    let _ = store::lock(&self.store).remove_mutation(mutation.id);
                    self.rejected_total.fetch_add(1, Ordering::Relaxed);
                    self.persist();
                    self.publish_status();
                    report.rejected += 1;
                }
            }
        }

        report
    }

    /// Claim the entity's head pending mutation, marking it in-flight. The
    /// transition is persisted before the replay is sent.
    fn claim(&self, key: &EntityKey, cutoff: MutationId) -> Option<QueuedMutation> {
        let claimed = {
            let mut store = store::lock(&self.store);
            let id = store
                .list_pending(Some(&key.entity_type), Some(key.entity_id))
                .first()
                .map(|m| m.id)
                .filter(|id| *id <= cutoff)?;
            store
                .update_status(id, MutationStatus::InFlight, None)
                .ok()?;
            store.mutation(id).cloned()
        };
        if claimed.is_some() {
            self.persist();
        }
        claimed
    }

    fn pending_for(&self, key: &EntityKey, cutoff: MutationId) -> usize {
        store::lock(&self.store)
            .list_pending(Some(&key.entity_type), Some(key.entity_id))
            .iter()
            .filter(|m| m.id <= cutoff)
            .count()
    }

    /// Exponential backoff with jitter: `base * 2^(n-1)` capped, plus up to
    /// 10% random spread so parallel retries do not align.
    fn backoff(&self, retries: u32) -> Duration {
        let exp = retries.saturating_sub(1).min(16);
        let delay = self
            .config
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.config.backoff_cap);
        let jitter = delay.as_millis() as u64 / 10;
        if jitter == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter))
    }

    /// Run the background loop: drain on connectivity recovery, on explicit
    /// kicks, and on a periodic interval while online.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut connectivity = self.monitor.subscribe();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.reset();

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = connectivity.changed() => {
                    if result.is_ok() && *connectivity.borrow() {
                        self.drain().await;
                    } else {
                        self.publish_status();
                    }
                }
                _ = interval.tick() => {
                    if self.monitor.is_online() {
                        self.drain().await;
                    }
                }
                _ = self.kick.notified() => {
                    if self.monitor.is_online() {
                        self.drain().await;
                    }
                }
            }
        }
        debug!("sync loop stopped");
    }

    /// Spawn the background loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()>
    where
        T: 'static,
        B: 'static,
    {
        tokio::spawn(self.run())
    }

    /// Signal the background loop to stop after the current pass.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // ------------------------------------------------------------------
    // Internal plumbing
    // ------------------------------------------------------------------

    fn persist(&self) {
        let image = store::lock(&self.store).export_state();
        let result = image.to_json().and_then(|data| self.backend.save(&data));
        match result {
            Ok(()) => {}
            Err(err) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(error = %err, "offline storage unavailable, continuing memory-only");
                }
            }
        }
    }

    fn publish_status(&self) {
        let (depth, open_conflicts) = {
            let store = store::lock(&self.store);
            (store.depth(), store.open_conflict_count())
        };
        let status = SyncStatus {
            is_online: self.monitor.is_online(),
            is_syncing: self.syncing.load(Ordering::Relaxed),
            pending: depth.pending,
            in_flight: depth.in_flight,
            failed: depth.failed,
            open_conflicts,
            rejected: self.rejected_total.load(Ordering::Relaxed),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Whether durable persistence is currently unavailable.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
