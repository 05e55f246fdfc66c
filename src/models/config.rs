use crate::models::snapshot::{AutomationConfig, DEFAULT_FREQUENCY_SECONDS, QuotaLimit, Snapshot};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::time::Duration;

/// Top-level configuration loaded by [`crate::config::ConfigManager`].
///
/// Every section falls back to its defaults, so a partial `syncdeck.yaml`
/// (or none at all) is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub scheduler: SchedulerConfig,
    pub quota: QuotaConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Build the snapshot that bootstrap seeds when the remote has nothing
    /// usable.
    pub fn seed_snapshot(&self) -> Snapshot {
        let frequency =
            NonZeroU64::new(self.scheduler.default_frequency_seconds).unwrap_or(DEFAULT_FREQUENCY_SECONDS);
        Snapshot::with_automation(AutomationConfig::new(self.scheduler.default_enabled, frequency))
    }
}

/// Which [`crate::remote::RemoteStore`] implementation to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    #[default]
    Http,
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,

    /// Base URL; the state endpoint is `{url}/state`.
    pub url: String,

    /// Snapshot file for the `file` backend.
    pub path: Utf8PathBuf,

    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Http,
            url: "http://127.0.0.1:8787".to_string(),
            path: Utf8PathBuf::from("state.json"),
            request_timeout_ms: 10_000,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on how long `ensure_ready` waits for bootstrap.
    pub ready_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 15_000,
        }
    }
}

impl StoreConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiescence window before a burst of mutations is written out.
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { debounce_ms: 1_000 }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// What a failed run does to the schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Failed runs still move `last_run_timestamp`; the next attempt waits a
    /// full period.
    #[default]
    Advance,
    /// Failed runs leave `last_run_timestamp` alone, so the task stays due
    /// and the next tick tries again.
    Retry,
}

impl FailurePolicy {
    pub fn advances_on_failure(&self) -> bool {
        matches!(self, Self::Advance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub default_frequency_seconds: u64,
    pub default_enabled: bool,
    pub failure_policy: FailurePolicy,
    pub history_limit: usize,

    /// Shell command run by the binary's task runner. No command, no scheduler.
    pub command: Option<String>,
    pub command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            default_frequency_seconds: DEFAULT_FREQUENCY_SECONDS.get(),
            default_enabled: false,
            failure_policy: FailurePolicy::Advance,
            history_limit: 20,
            command: None,
            command_timeout_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Plan given to principals seen for the first time.
    pub default_plan: String,

    /// Plan name to limit. `-1` is unlimited.
    pub plans: IndexMap<String, QuotaLimit>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        let mut plans = IndexMap::new();
        plans.insert("free".to_string(), QuotaLimit::Limited(100));
        plans.insert("pro".to_string(), QuotaLimit::Limited(1_000));
        plans.insert("enterprise".to_string(), QuotaLimit::Unlimited);

        Self {
            default_plan: "free".to_string(),
            plans,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Utf8PathBuf,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from("logs"),
            prefix: "syncdeck".to_string(),
            debug: false,
            console: true,
            json: false,
        }
    }
}
