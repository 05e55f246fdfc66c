//! Data models for syncdeck.
//!
//! - [`Snapshot`]: the state aggregate held by [`StateStore`](crate::state::StateStore)
//!   and written in full to the remote store
//! - [`QuotaRecord`] / [`QuotaLimit`]: per-principal usage counters inside the snapshot
//! - [`AutomationConfig`] / [`RunRecord`]: recurring task settings and run history
//! - [`AppConfig`]: process configuration loaded by [`ConfigManager`](crate::config::ConfigManager)
//!
//! All snapshot types derive `Serialize`/`Deserialize` and tolerate missing
//! fields, so an older remote payload still loads.

pub mod config;
pub mod snapshot;

pub use config::{
    AppConfig, FailurePolicy, LoggingConfig, QuotaConfig, RemoteBackend, RemoteConfig,
    SchedulerConfig, StoreConfig, SyncConfig,
};
pub use snapshot::{
    AutomationConfig, DEFAULT_FREQUENCY_SECONDS, QuotaLimit, QuotaRecord, RunRecord, RunTrigger,
    Snapshot, UNLIMITED_SENTINEL,
};
