//! Remote persistence for the full state snapshot.
//!
//! The remote side is a single addressable document: read it whole, replace
//! it whole. [`RemoteStore::fetch`] returns a tagged [`FetchOutcome`] so
//! callers never infer failure from the payload's shape. A store that holds
//! nothing is `Ok(FetchOutcome::Empty)`, and anything that prevented a
//! trustworthy read is an `Err(RemoteError)` whose [`FailureKind`] tells
//! transport problems apart from unparsable payloads.
//!
//! Backends:
//! - [`HttpRemoteStore`]: `GET`/`POST {url}/state` over `reqwest`
//! - [`FileRemoteStore`]: a JSON document on local disk
//! - [`MemoryRemoteStore`]: in-process, with failure injection for tests

pub mod file;
pub mod http;
pub mod memory;

pub use file::FileRemoteStore;
pub use http::HttpRemoteStore;
pub use memory::{InjectedFailure, MemoryRemoteStore};

use crate::models::{RemoteBackend, RemoteConfig, Snapshot};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result of a successful read from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The store holds a snapshot.
    Found(Snapshot),
    /// The store is reachable but holds nothing yet.
    Empty,
}

/// Broad class of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unreachable, non-success status, or a content type that is not JSON.
    Transport,
    /// A payload arrived but is not a snapshot.
    Schema,
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote store unreachable: {0}")]
    Unreachable(String),

    #[error("remote store responded with status {0}")]
    Status(u16),

    #[error("remote store responded with content type {found:?}, expected JSON")]
    UnexpectedContentType { found: String },

    #[error("remote payload is not a valid snapshot: {0}")]
    Schema(String),

    #[error("remote store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Schema(_) => FailureKind::Schema,
            Self::Unreachable(_) | Self::Status(_) | Self::UnexpectedContentType { .. } | Self::Io(_) => {
                FailureKind::Transport
            }
        }
    }
}

/// Read/replace endpoint for the full snapshot.
///
/// `replace` is an idempotent overwrite, never a patch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self) -> Result<FetchOutcome, RemoteError>;

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), RemoteError>;

    /// Short human-readable location, used in log lines.
    fn describe(&self) -> String;
}

/// Build the backend selected in configuration.
pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        RemoteBackend::Http => Arc::new(HttpRemoteStore::new(&config.url, config.request_timeout())?),
        RemoteBackend::File => Arc::new(FileRemoteStore::new(config.path.clone())),
        RemoteBackend::Memory => Arc::new(MemoryRemoteStore::new()),
    };
    tracing::info!(backend = ?config.backend, location = %store.describe(), "remote store configured");
    Ok(store)
}

/// Decode a raw document body into a [`FetchOutcome`].
///
/// Blank bodies, `null` and `{}` all mean the store is empty.
pub(crate) fn decode_payload(body: &str) -> Result<FetchOutcome, RemoteError> {
    if body.trim().is_empty() {
        return Ok(FetchOutcome::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RemoteError::Schema(e.to_string()))?;

    match &value {
        serde_json::Value::Null => Ok(FetchOutcome::Empty),
        serde_json::Value::Object(map) if map.is_empty() => Ok(FetchOutcome::Empty),
        _ => serde_json::from_value(value)
            .map(FetchOutcome::Found)
            .map_err(|e| RemoteError::Schema(e.to_string())),
    }
}

pub(crate) fn encode_payload(snapshot: &Snapshot) -> Result<String, RemoteError> {
    serde_json::to_string_pretty(snapshot).map_err(|e| RemoteError::Schema(e.to_string()))
}
