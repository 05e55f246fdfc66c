// syncdeck - State synchronization and task scheduling core for dashboard clients
//
// This is the library crate containing the state store, persistence, quota and
// scheduling logic. The binary crate (main.rs) hosts it as a headless service.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod quota;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{AppConfig, AutomationConfig, QuotaLimit, QuotaRecord, Snapshot};
pub use quota::{QuotaDecision, QuotaGate};
pub use remote::{FetchOutcome, RemoteError, RemoteStore};
pub use scheduler::{AutomationScheduler, RunOutcome, SchedulerStatus, TaskRunner};
pub use state::{ReadinessState, StateChange, StateStore, StoreError, StoreOptions};
pub use sync::{FlushHandle, SyncWriter};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
