// State management module
//
// This module provides the StateStore, which owns the canonical Snapshot,
// gates access on bootstrap readiness, and emits change events that drive
// persistence.

mod readiness;

pub use readiness::ReadinessState;

use crate::metrics::Metrics;
use crate::models::{AppConfig, QuotaLimit, Snapshot};
use crate::remote::{FetchOutcome, RemoteStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change events emitted when the snapshot is modified
///
/// Emitted by [`StateStore::mutate`] / [`StateStore::update`] for whatever
/// actually changed, and by bootstrap/reset for lifecycle transitions.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Bootstrap finished and the snapshot was installed
    Bootstrapped { readiness: ReadinessState },

    /// One or more domain collections were added, replaced or removed
    CollectionsChanged { names: Vec<String> },

    /// A principal's quota record was created or changed
    QuotaChanged {
        principal_id: String,
        usage_count: u64,
        limit: QuotaLimit,
    },

    /// A principal's quota record was removed
    QuotaRemoved { principal_id: String },

    /// Automation settings or last-run bookkeeping changed
    AutomationChanged {
        enabled: bool,
        frequency_seconds: u64,
        last_run_timestamp: Option<DateTime<Utc>>,
    },

    /// The snapshot was discarded and re-seeded with defaults
    Reset { readiness: ReadinessState },
}

impl StateChange {
    /// Whether this change should be written to the remote store.
    ///
    /// Lifecycle events are not: bootstrap installs what was just read (or
    /// defaults that must not overwrite the remote), and reset persists its
    /// own defaults directly.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Self::Bootstrapped { .. } | Self::Reset { .. })
    }
}

/// Where the current snapshot came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Loaded from the remote store
    Remote,
    /// Remote was empty; defaults were seeded and persisted
    SeededDefaults,
    /// Remote failed; defaults are in memory only
    DegradedDefaults,
}

/// Health report for status consumers
///
/// Bootstrap failures never surface as errors to callers of
/// [`StateStore::ensure_ready`]; this is where they are reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub readiness: ReadinessState,
    pub source: Option<SnapshotSource>,
    pub last_error: Option<String>,
    pub revision: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state store is not ready (currently {0})")]
    NotReady(ReadinessState),

    #[error("timed out after {0:?} waiting for the state store to become ready")]
    ReadinessTimeout(Duration),

    #[error("state store readiness channel closed")]
    ReadinessClosed,
}

/// Construction options for [`StateStore`]
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Snapshot seeded when the remote store is empty or unreachable
    pub defaults: Snapshot,

    /// Upper bound on how long [`StateStore::ensure_ready`] waits
    pub ready_timeout: Duration,

    pub metrics: Arc<Metrics>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            defaults: Snapshot::default(),
            ready_timeout: Duration::from_secs(15),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &AppConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            defaults: config.seed_snapshot(),
            ready_timeout: config.store.ready_timeout(),
            metrics,
        }
    }
}

#[derive(Debug, Default)]
struct BootstrapReport {
    source: Option<SnapshotSource>,
    last_error: Option<String>,
}

struct StoreInner {
    snapshot: RwLock<Snapshot>,
    readiness: watch::Sender<ReadinessState>,
    changes: broadcast::Sender<StateChange>,
    report: Mutex<BootstrapReport>,
    remote: Arc<dyn RemoteStore>,
    defaults: Snapshot,
    ready_timeout: Duration,
    metrics: Arc<Metrics>,
}

/// Owner of the canonical in-memory [`Snapshot`]
///
/// This is the central state component that:
/// - Bootstraps the snapshot from a [`RemoteStore`], degrading to defaults
///   on failure
/// - Gates access behind a readiness signal that all waiters share
/// - Provides the single mutation entry point, [`mutate`](Self::mutate)
/// - Detects what each mutation changed and broadcasts [`StateChange`] events
///
/// # Usage
///
/// The store is an explicit object: construct it once and hand clones to
/// consumers. Clones share the same snapshot.
/// - [`ensure_ready()`](Self::ensure_ready) before first use
/// - [`read()`](Self::read) for read access through a closure
/// - [`mutate()`](Self::mutate) for changes with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to changes
///
/// # Related Types
///
/// - [`crate::sync::SyncWriter`]: persists the snapshot after changes settle
/// - [`crate::quota::QuotaGate`]: check-and-increment inside one mutation
/// - [`crate::scheduler::AutomationScheduler`]: reads and records runs
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    /// Create an uninitialized store; nothing is fetched until
    /// [`ensure_ready`](Self::ensure_ready) or [`bootstrap`](Self::bootstrap).
    pub fn new(remote: Arc<dyn RemoteStore>, options: StoreOptions) -> Self {
        let (readiness, _) = watch::channel(ReadinessState::Uninitialized);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(StoreInner {
                snapshot: RwLock::new(options.defaults.clone()),
                readiness,
                changes,
                report: Mutex::new(BootstrapReport::default()),
                remote,
                defaults: options.defaults,
                ready_timeout: options.ready_timeout,
                metrics: options.metrics,
            }),
        }
    }

    /// Current readiness without waiting
    pub fn readiness(&self) -> ReadinessState {
        *self.inner.readiness.borrow()
    }

    /// Watch readiness transitions
    pub fn subscribe_readiness(&self) -> watch::Receiver<ReadinessState> {
        self.inner.readiness.subscribe()
    }

    /// Subscribe to snapshot change events
    ///
    /// Returns a receiver that will get all future changes. Multiple
    /// subscribers can listen simultaneously.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.inner.changes.subscribe()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Wait until the store is Ready or Degraded
    ///
    /// The first caller on an uninitialized store starts bootstrap on a
    /// background task, so dropping the waiting future never strands the
    /// store in `Loading`. Every caller then waits on the same readiness
    /// signal, bounded by the configured timeout.
    ///
    /// A degraded bootstrap is not an error: it returns
    /// `Ok(ReadinessState::Degraded)` and the reason is in [`health`](Self::health).
    ///
    /// # Errors
    ///
    /// [`StoreError::ReadinessTimeout`] if bootstrap has not settled in time.
    pub async fn ensure_ready(&self) -> Result<ReadinessState, StoreError> {
        if self.transition(ReadinessState::Loading, false) {
            let store = self.clone();
            tokio::spawn(async move {
                store.load_from_remote().await;
            });
        }
        self.wait_settled().await
    }

    /// Run bootstrap on the calling task
    ///
    /// Reads the remote store and installs the result:
    /// - snapshot present: installed as-is, state becomes `Ready`
    /// - store empty: defaults are seeded and persisted, state becomes `Ready`
    /// - any failure (transport or schema): defaults are seeded **without**
    ///   persisting, state becomes `Degraded`
    ///
    /// If bootstrap is already underway or finished, this just waits for it.
    pub async fn bootstrap(&self) -> Result<ReadinessState, StoreError> {
        if self.transition(ReadinessState::Loading, false) {
            return Ok(self.load_from_remote().await);
        }
        self.wait_settled().await
    }

    /// Execute a function with read access to the snapshot
    ///
    /// # Example
    /// ```ignore
    /// let enabled = store.read(|snapshot| snapshot.automation.enabled)?;
    /// ```
    pub fn read<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Snapshot) -> R,
    {
        self.check_ready()?;
        let snapshot = self.read_lock();
        Ok(f(&snapshot))
    }

    /// Clone of the whole snapshot
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.read(Snapshot::clone)
    }

    /// Mutate the snapshot and return the closure's result
    ///
    /// This is the only way any component changes the snapshot. The closure
    /// runs under the write lock, so a read-compare-write inside it cannot
    /// interleave with another mutation. Afterwards the store:
    /// 1. Compares the snapshot with its previous value
    /// 2. Bumps `revision` if anything changed
    /// 3. Broadcasts one [`StateChange`] per changed area
    ///
    /// A closure that changes nothing emits nothing.
    pub fn mutate<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Snapshot) -> R,
    {
        self.apply(f).map(|(result, _)| result)
    }

    /// Mutate the snapshot and return the change events that were emitted
    ///
    /// # Example
    /// ```ignore
    /// let changes = store.update(|snapshot| {
    ///     snapshot.automation.enabled = true;
    /// })?;
    /// ```
    pub fn update<F>(&self, f: F) -> Result<Vec<StateChange>, StoreError>
    where
        F: FnOnce(&mut Snapshot),
    {
        self.apply(f).map(|(_, changes)| changes)
    }

    /// Discard the snapshot and re-seed defaults
    ///
    /// Destructive recovery. Moves the store back to `Loading`, installs the
    /// defaults, and writes them to the remote store directly. Ends `Ready`
    /// if that write succeeded, otherwise `Degraded`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotReady`] if bootstrap has not settled yet.
    pub async fn reset_to_defaults(&self) -> Result<ReadinessState, StoreError> {
        if !self.transition(ReadinessState::Loading, true) {
            return Err(StoreError::NotReady(self.readiness()));
        }

        let snapshot = {
            let mut current = self.write_lock();
            let mut defaults = self.inner.defaults.clone();
            // Keep revisions monotonic across the reset.
            defaults.revision = current.revision + 1;
            *current = defaults.clone();
            defaults
        };

        let (readiness, source, error) = match self.inner.remote.replace(&snapshot).await {
            Ok(()) => {
                tracing::info!(revision = snapshot.revision, "state reset to defaults");
                (ReadinessState::Ready, SnapshotSource::SeededDefaults, None)
            }
            Err(e) => {
                tracing::warn!(error = %e, "state reset to defaults but the remote write failed");
                (ReadinessState::Degraded, SnapshotSource::DegradedDefaults, Some(e.to_string()))
            }
        };

        self.set_report(source, error);
        self.transition(readiness, false);
        self.emit(StateChange::Reset { readiness });
        Ok(readiness)
    }

    /// Readiness, snapshot source and the last bootstrap error
    pub fn health(&self) -> StoreHealth {
        let report = self.report_lock();
        StoreHealth {
            readiness: self.readiness(),
            source: report.source,
            last_error: report.last_error.clone(),
            revision: self.read_lock().revision,
        }
    }

    // Convenience methods for common collection updates

    /// Replace a domain collection wholesale
    pub fn set_collection(
        &self,
        name: &str,
        items: Vec<serde_json::Value>,
    ) -> Result<Vec<StateChange>, StoreError> {
        self.update(|snapshot| {
            snapshot.collections.insert(name.to_string(), items);
        })
    }

    /// Append one item to a domain collection, creating it if needed
    pub fn push_to_collection(
        &self,
        name: &str,
        item: serde_json::Value,
    ) -> Result<Vec<StateChange>, StoreError> {
        self.update(|snapshot| {
            snapshot.collections.entry(name.to_string()).or_default().push(item);
        })
    }

    /// Remove a domain collection
    pub fn remove_collection(&self, name: &str) -> Result<Vec<StateChange>, StoreError> {
        self.update(|snapshot| {
            snapshot.collections.shift_remove(name);
        })
    }

    async fn load_from_remote(&self) -> ReadinessState {
        let remote = &self.inner.remote;
        tracing::info!(remote = %remote.describe(), "bootstrapping state");

        let (snapshot, readiness, source, error) = match remote.fetch().await {
            Ok(FetchOutcome::Found(snapshot)) => {
                tracing::info!(revision = snapshot.revision, "loaded snapshot from remote store");
                (snapshot, ReadinessState::Ready, SnapshotSource::Remote, None)
            }
            Ok(FetchOutcome::Empty) => {
                let defaults = self.inner.defaults.clone();
                let error = match remote.replace(&defaults).await {
                    Ok(()) => {
                        tracing::info!("remote store empty, seeded and persisted defaults");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "remote store empty, failed to persist seeded defaults");
                        Some(e.to_string())
                    }
                };
                (defaults, ReadinessState::Ready, SnapshotSource::SeededDefaults, error)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = ?e.kind(),
                    "bootstrap failed, continuing on in-memory defaults"
                );
                (
                    self.inner.defaults.clone(),
                    ReadinessState::Degraded,
                    SnapshotSource::DegradedDefaults,
                    Some(e.to_string()),
                )
            }
        };

        *self.write_lock() = snapshot;
        self.set_report(source, error);
        self.transition(readiness, false);
        self.emit(StateChange::Bootstrapped { readiness });
        readiness
    }

    async fn wait_settled(&self) -> Result<ReadinessState, StoreError> {
        let timeout = self.inner.ready_timeout;
        let mut rx = self.inner.readiness.subscribe();

        match tokio::time::timeout(timeout, rx.wait_for(ReadinessState::is_settled)).await {
            Ok(Ok(state)) => Ok(*state),
            Ok(Err(_)) => Err(StoreError::ReadinessClosed),
            Err(_) => {
                tracing::warn!("gave up waiting for state store readiness after {:?}", timeout);
                Err(StoreError::ReadinessTimeout(timeout))
            }
        }
    }

    /// Atomically move readiness to `next` if the transition is legal.
    fn transition(&self, next: ReadinessState, explicit_reset: bool) -> bool {
        self.inner.readiness.send_if_modified(|current| {
            if current.can_transition_to(next, explicit_reset) {
                tracing::debug!("readiness {} -> {}", current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn check_ready(&self) -> Result<(), StoreError> {
        let readiness = self.readiness();
        if readiness.is_settled() {
            Ok(())
        } else {
            Err(StoreError::NotReady(readiness))
        }
    }

    fn apply<F, R>(&self, f: F) -> Result<(R, Vec<StateChange>), StoreError>
    where
        F: FnOnce(&mut Snapshot) -> R,
    {
        self.check_ready()?;

        let mut snapshot = self.write_lock();
        let old = snapshot.clone();

        let result = f(&mut snapshot);

        let changes = detect_changes(&old, &snapshot);
        snapshot.revision = if changes.is_empty() {
            old.revision
        } else {
            old.revision + 1
        };

        if !changes.is_empty() {
            self.inner.metrics.record_mutation();
        }
        // Emit under the write lock so events keep mutation order.
        for change in &changes {
            self.emit(change.clone());
        }

        Ok((result, changes))
    }

    fn emit(&self, change: StateChange) {
        // It's OK if no one is listening
        let observed = self.inner.changes.send(change).is_ok();
        self.inner.metrics.record_change_event(observed);
    }

    fn set_report(&self, source: SnapshotSource, error: Option<String>) {
        let mut report = self.report_lock();
        report.source = Some(source);
        report.last_error = error;
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_lock(&self) -> MutexGuard<'_, BootstrapReport> {
        self.inner.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Work out which areas of the snapshot changed and describe them as events.
fn detect_changes(old: &Snapshot, new: &Snapshot) -> Vec<StateChange> {
    let mut changes = Vec::new();

    // Collections: added or modified, then removed
    let mut names: Vec<String> = new
        .collections
        .iter()
        .filter(|(name, items)| old.collections.get(*name) != Some(*items))
        .map(|(name, _)| name.clone())
        .collect();
    names.extend(
        old.collections
            .keys()
            .filter(|name| !new.collections.contains_key(*name))
            .cloned(),
    );
    if !names.is_empty() {
        changes.push(StateChange::CollectionsChanged { names });
    }

    for (principal_id, record) in &new.quotas {
        if old.quotas.get(principal_id) != Some(record) {
            changes.push(StateChange::QuotaChanged {
                principal_id: principal_id.clone(),
                usage_count: record.usage_count,
                limit: record.limit,
            });
        }
    }
    for principal_id in old.quotas.keys() {
        if !new.quotas.contains_key(principal_id) {
            changes.push(StateChange::QuotaRemoved {
                principal_id: principal_id.clone(),
            });
        }
    }

    if old.automation != new.automation {
        changes.push(StateChange::AutomationChanged {
            enabled: new.automation.enabled,
            frequency_seconds: new.automation.frequency_seconds.get(),
            last_run_timestamp: new.automation.last_run_timestamp,
        });
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuotaRecord;
    use crate::remote::{MemoryRemoteStore, MockRemoteStore, RemoteError};
    use serde_json::json;

    fn mock_remote() -> MockRemoteStore {
        let mut remote = MockRemoteStore::new();
        remote.expect_describe().return_const("mock".to_string());
        remote
    }

    async fn ready_store() -> StateStore {
        let store = StateStore::new(Arc::new(MemoryRemoteStore::new()), StoreOptions::default());
        store.ensure_ready().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_read_before_ready_fails() {
        let store = StateStore::new(Arc::new(MemoryRemoteStore::new()), StoreOptions::default());

        assert_eq!(
            store.read(|s| s.revision),
            Err(StoreError::NotReady(ReadinessState::Uninitialized))
        );
        assert!(store.mutate(|s| s.revision += 1).is_err());
    }

    #[tokio::test]
    async fn test_empty_remote_seeds_and_persists() {
        let mut remote = mock_remote();
        remote.expect_fetch().times(1).returning(|| Ok(FetchOutcome::Empty));
        remote.expect_replace().times(1).returning(|_| Ok(()));

        let store = StateStore::new(Arc::new(remote), StoreOptions::default());
        assert_eq!(store.ensure_ready().await, Ok(ReadinessState::Ready));
        assert_eq!(store.health().source, Some(SnapshotSource::SeededDefaults));
    }

    #[tokio::test]
    async fn test_content_type_failure_degrades_without_persisting() {
        let mut remote = mock_remote();
        remote.expect_fetch().times(1).returning(|| {
            Err(RemoteError::UnexpectedContentType {
                found: "text/html".to_string(),
            })
        });
        remote.expect_replace().times(0);

        let store = StateStore::new(Arc::new(remote), StoreOptions::default());
        assert_eq!(store.ensure_ready().await, Ok(ReadinessState::Degraded));

        let health = store.health();
        assert_eq!(health.source, Some(SnapshotSource::DegradedDefaults));
        assert!(health.last_error.unwrap().contains("text/html"));
        // Degraded still serves reads and writes against defaults
        assert!(store.set_collection("notes", vec![json!("offline")]).is_ok());
    }

    #[tokio::test]
    async fn test_schema_failure_degrades() {
        let mut remote = mock_remote();
        remote
            .expect_fetch()
            .returning(|| Err(RemoteError::Schema("expected struct".to_string())));
        remote.expect_replace().times(0);

        let store = StateStore::new(Arc::new(remote), StoreOptions::default());
        assert_eq!(store.bootstrap().await, Ok(ReadinessState::Degraded));
    }

    #[tokio::test]
    async fn test_bootstrap_does_not_emit_persistable_change() {
        let store = StateStore::new(Arc::new(MemoryRemoteStore::new()), StoreOptions::default());
        let mut rx = store.subscribe();

        store.ensure_ready().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            StateChange::Bootstrapped {
                readiness: ReadinessState::Ready
            }
        );
        assert!(!event.is_persistable());
    }

    #[tokio::test]
    async fn test_second_ensure_ready_does_not_refetch() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = StateStore::new(remote.clone(), StoreOptions::default());

        store.ensure_ready().await.unwrap();
        store.ensure_ready().await.unwrap();
        store.bootstrap().await.unwrap();

        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_mutate_returns_value_and_bumps_revision() {
        let store = ready_store().await;

        let previous = store
            .mutate(|s| {
                s.automation.enabled = true;
                s.revision
            })
            .unwrap();

        assert_eq!(store.read(|s| s.revision).unwrap(), previous + 1);
    }

    #[tokio::test]
    async fn test_noop_mutation_emits_nothing() {
        let store = ready_store().await;
        let revision = store.read(|s| s.revision).unwrap();

        let changes = store.update(|_| {}).unwrap();
        assert!(changes.is_empty());

        // Writing the revision directly is not a change either
        let changes = store.update(|s| s.revision = 999).unwrap();
        assert!(changes.is_empty());
        assert_eq!(store.read(|s| s.revision).unwrap(), revision);
    }

    #[tokio::test]
    async fn test_quota_change_detection() {
        let store = ready_store().await;

        let changes = store
            .update(|s| {
                s.quotas.insert(
                    "alice".to_string(),
                    QuotaRecord::new("alice", "free", QuotaLimit::Limited(10)),
                );
            })
            .unwrap();

        assert_eq!(
            changes,
            vec![StateChange::QuotaChanged {
                principal_id: "alice".to_string(),
                usage_count: 0,
                limit: QuotaLimit::Limited(10),
            }]
        );

        let changes = store.update(|s| {
            s.quotas.shift_remove("alice");
        });
        assert!(matches!(
            changes.unwrap().as_slice(),
            [StateChange::QuotaRemoved { .. }]
        ));
    }

    #[tokio::test]
    async fn test_collection_change_detection() {
        let store = ready_store().await;

        let changes = store.push_to_collection("reports", json!({"id": 1})).unwrap();
        assert_eq!(
            changes,
            vec![StateChange::CollectionsChanged {
                names: vec!["reports".to_string()]
            }]
        );

        let changes = store.remove_collection("reports").unwrap();
        assert!(matches!(changes[0], StateChange::CollectionsChanged { .. }));
        assert!(store.read(|s| s.collection("reports").is_empty()).unwrap());
    }

    #[tokio::test]
    async fn test_reset_to_defaults_persists_and_keeps_revision_monotonic() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = StateStore::new(remote.clone(), StoreOptions::default());
        store.ensure_ready().await.unwrap();
        store.set_collection("notes", vec![json!("a"), json!("b")]).unwrap();
        let before = store.read(|s| s.revision).unwrap();

        let mut rx = store.subscribe();
        assert_eq!(store.reset_to_defaults().await, Ok(ReadinessState::Ready));

        assert!(store.read(|s| s.collections.is_empty()).unwrap());
        assert_eq!(store.read(|s| s.revision).unwrap(), before + 1);
        assert_eq!(remote.stored().unwrap().revision, before + 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            StateChange::Reset {
                readiness: ReadinessState::Ready
            }
        );
    }

    #[tokio::test]
    async fn test_reset_before_bootstrap_is_rejected() {
        let store = StateStore::new(Arc::new(MemoryRemoteStore::new()), StoreOptions::default());
        assert_eq!(
            store.reset_to_defaults().await,
            Err(StoreError::NotReady(ReadinessState::Uninitialized))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_ready_times_out() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_fetch_delay(Some(Duration::from_secs(60)));
        let options = StoreOptions {
            ready_timeout: Duration::from_secs(5),
            ..StoreOptions::default()
        };
        let store = StateStore::new(remote, options);

        assert_eq!(
            store.ensure_ready().await,
            Err(StoreError::ReadinessTimeout(Duration::from_secs(5)))
        );
        assert_eq!(store.readiness(), ReadinessState::Loading);
    }

    #[test]
    fn test_detect_changes_reports_each_area() {
        let old = Snapshot::default();
        let mut new = old.clone();
        new.collections.insert("a".to_string(), vec![json!(1)]);
        new.automation.enabled = true;

        let changes = detect_changes(&old, &new);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(StateChange::is_persistable));
    }
}
