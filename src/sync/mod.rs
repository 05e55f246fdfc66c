//! Debounced persistence of the full snapshot.
//!
//! [`SyncWriter`] listens to [`StateStore`] change events and writes the whole
//! snapshot to the [`RemoteStore`] once mutations have been quiet for the
//! debounce window. Writes are fire-and-forget: a failure is logged, counted
//! and dropped. The next change schedules a fresh write of the then-current
//! snapshot.
//!
//! Components that need a write outside the change stream use a cloned
//! [`FlushHandle`].

mod debounce;

pub use debounce::Debouncer;

use crate::remote::RemoteStore;
use crate::state::{ReadinessState, StateStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("state store is not ready; nothing to flush")]
    NotReady,

    #[error("state store is degraded; remote write withheld")]
    Degraded,

    #[error("remote write failed: {0}")]
    Remote(String),

    #[error("sync writer has stopped")]
    Stopped,
}

enum FlushCommand {
    Request,
    FlushNow(oneshot::Sender<Result<u64, SyncError>>),
}

impl std::fmt::Debug for FlushCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => f.write_str("Request"),
            Self::FlushNow(_) => f.write_str("FlushNow"),
        }
    }
}

/// Cloneable handle for asking the writer to persist.
#[derive(Clone, Debug)]
pub struct FlushHandle {
    tx: mpsc::Sender<FlushCommand>,
}

impl FlushHandle {
    /// Schedule a debounced write, restarting any pending timer.
    ///
    /// Never blocks. If the command queue is full a write is already
    /// on its way and the request is dropped.
    pub fn request(&self) {
        if let Err(e) = self.tx.try_send(FlushCommand::Request) {
            tracing::trace!("flush request not queued: {}", e);
        }
    }

    /// Cancel any pending timer and write the snapshot now.
    ///
    /// Resolves once the remote write finished and returns the revision that
    /// was written.
    pub async fn flush_now(&self) -> Result<u64, SyncError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(FlushCommand::FlushNow(ack))
            .await
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)?
    }
}

/// Background task owning the single pending write.
///
/// Dropping the writer cancels it; a pending write is discarded rather than
/// fired against a torn-down store. Call [`flush_now`](FlushHandle::flush_now)
/// first when the last changes must reach the remote.
pub struct SyncWriter {
    handle: FlushHandle,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl SyncWriter {
    /// Subscribe to `store` and start the writer task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(store: StateStore, remote: Arc<dyn RemoteStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        // Subscribe before spawning so no change between here and the first
        // poll of the task is missed.
        let changes = store.subscribe();
        let worker = Worker {
            store,
            remote,
            debouncer: Debouncer::new(debounce),
        };
        let join = tokio::spawn(worker.run(changes, rx, cancel.clone()));

        tracing::debug!("sync writer started with {:?} debounce", debounce);

        Self {
            handle: FlushHandle { tx },
            cancel,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> FlushHandle {
        self.handle.clone()
    }

    /// Stop the writer and wait for its task to exit.
    ///
    /// A pending debounced write is discarded.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                tracing::error!("sync writer task failed: {}", e);
            }
        }
    }
}

impl Drop for SyncWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    store: StateStore,
    remote: Arc<dyn RemoteStore>,
    debouncer: Debouncer,
}

impl Worker {
    async fn run(
        mut self,
        mut changes: broadcast::Receiver<crate::state::StateChange>,
        mut commands: mpsc::Receiver<FlushCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.debouncer.is_armed() {
                        tracing::debug!("sync writer stopped with a pending write; discarding it");
                    }
                    break;
                }
                change = changes.recv() => match change {
                    Ok(change) if change.is_persistable() => self.schedule(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("sync writer lagged by {} change events", missed);
                        self.schedule();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                command = commands.recv() => match command {
                    Some(FlushCommand::Request) => self.schedule(),
                    Some(FlushCommand::FlushNow(ack)) => {
                        self.debouncer.cancel();
                        let result = self.flush().await;
                        let _ = ack.send(result);
                    }
                    None => break,
                },
                _ = self.debouncer.fired() => {
                    let _ = self.flush().await;
                }
            }
        }

        tracing::debug!("sync writer stopped");
    }

    fn schedule(&mut self) {
        if self.debouncer.arm() {
            self.store.metrics().record_coalesced_change();
        }
    }

    async fn flush(&self) -> Result<u64, SyncError> {
        if self.store.readiness() == ReadinessState::Degraded {
            tracing::info!("store is degraded; keeping changes in memory only");
            self.store.metrics().record_flush_withheld();
            return Err(SyncError::Degraded);
        }

        let snapshot = match self.store.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!("skipping flush: {}", e);
                return Err(SyncError::NotReady);
            }
        };

        let revision = snapshot.revision;
        match self.remote.replace(&snapshot).await {
            Ok(()) => {
                tracing::debug!(revision, remote = %self.remote.describe(), "snapshot flushed");
                self.store.metrics().record_flush(true);
                Ok(revision)
            }
            Err(e) => {
                tracing::warn!(revision, error = %e, "snapshot flush failed; dropping write");
                self.store.metrics().record_flush(false);
                Err(SyncError::Remote(e.to_string()))
            }
        }
    }
}
