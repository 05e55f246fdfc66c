use super::{FetchOutcome, RemoteError, RemoteStore, decode_payload, encode_payload};
use crate::models::Snapshot;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Failure a [`MemoryRemoteStore`] can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Unreachable,
    Status(u16),
    ContentType(String),
}

impl InjectedFailure {
    fn to_error(&self) -> RemoteError {
        match self {
            Self::Unreachable => RemoteError::Unreachable("injected failure".to_string()),
            Self::Status(code) => RemoteError::Status(*code),
            Self::ContentType(found) => RemoteError::UnexpectedContentType {
                found: found.clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    payload: Option<String>,
    fetch_failure: Option<InjectedFailure>,
    replace_failure: Option<InjectedFailure>,
    fetch_delay: Option<Duration>,
    fetches: usize,
    replaces: usize,
}

/// In-process remote store.
///
/// The snapshot is kept as serialized JSON, so reads go through the same
/// decode path as the real backends. Counters and failure injection make it
/// the fixture for store, writer and scheduler tests.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: &Snapshot) -> Self {
        let store = Self::new();
        // A snapshot built from our own types always serializes.
        if let Ok(payload) = encode_payload(snapshot) {
            store.lock().payload = Some(payload);
        }
        store
    }

    /// Seed the store with an arbitrary document body.
    pub fn with_raw_payload(payload: impl Into<String>) -> Self {
        let store = Self::new();
        store.lock().payload = Some(payload.into());
        store
    }

    pub fn fail_fetches(&self, failure: Option<InjectedFailure>) {
        self.lock().fetch_failure = failure;
    }

    pub fn fail_replaces(&self, failure: Option<InjectedFailure>) {
        self.lock().replace_failure = failure;
    }

    /// Make every fetch take this long before answering.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// The stored snapshot, if there is one and it parses.
    pub fn stored(&self) -> Option<Snapshot> {
        let payload = self.lock().payload.clone()?;
        match decode_payload(&payload) {
            Ok(FetchOutcome::Found(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    pub fn raw_payload(&self) -> Option<String> {
        self.lock().payload.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Number of replace calls that reached the store, failed ones included.
    pub fn replace_count(&self) -> usize {
        self.lock().replaces
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self) -> Result<FetchOutcome, RemoteError> {
        let delay = {
            let mut state = self.lock();
            state.fetches += 1;
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if let Some(failure) = &state.fetch_failure {
            return Err(failure.to_error());
        }
        match &state.payload {
            Some(payload) => decode_payload(payload),
            None => Ok(FetchOutcome::Empty),
        }
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), RemoteError> {
        let payload = encode_payload(snapshot)?;

        let mut state = self.lock();
        state.replaces += 1;
        if let Some(failure) = &state.replace_failure {
            return Err(failure.to_error());
        }
        state.payload = Some(payload);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_is_identical() {
        let store = MemoryRemoteStore::new();
        let mut snapshot = Snapshot::default();
        snapshot.revision = 4;
        snapshot.automation.enabled = true;

        store.replace(&snapshot).await.unwrap();
        assert_eq!(store.fetch().await.unwrap(), FetchOutcome::Found(snapshot.clone()));
        assert_eq!(store.stored(), Some(snapshot));
        assert_eq!(store.replace_count(), 1);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryRemoteStore::new();
        store.fail_fetches(Some(InjectedFailure::ContentType("text/html".into())));
        store.fail_replaces(Some(InjectedFailure::Status(503)));

        assert!(matches!(
            store.fetch().await,
            Err(RemoteError::UnexpectedContentType { .. })
        ));
        assert!(matches!(
            store.replace(&Snapshot::default()).await,
            Err(RemoteError::Status(503))
        ));
        assert_eq!(store.replace_count(), 1);
        assert!(store.raw_payload().is_none());
    }

    #[tokio::test]
    async fn test_raw_payload_goes_through_decoder() {
        let store = MemoryRemoteStore::with_raw_payload("<html>maintenance</html>");
        assert!(matches!(store.fetch().await, Err(RemoteError::Schema(_))));
        assert!(store.stored().is_none());
    }
}
