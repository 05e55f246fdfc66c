use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use uuid::Uuid;

/// Wire sentinel for a limit that never denies.
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Default automation period: once a day.
pub const DEFAULT_FREQUENCY_SECONDS: NonZeroU64 = NonZeroU64::new(86_400).unwrap();

/// Usage ceiling for a principal.
///
/// Serialized as a plain integer where `-1` means [`QuotaLimit::Unlimited`].
/// Any other negative value is rejected at deserialization time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum QuotaLimit {
    Unlimited,
    Limited(u64),
}

impl QuotaLimit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Returns true if one more unit of usage fits under this limit.
    pub fn has_headroom(&self, usage: u64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(limit) => usage < *limit,
        }
    }
}

impl TryFrom<i64> for QuotaLimit {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNLIMITED_SENTINEL => Ok(Self::Unlimited),
            n if n >= 0 => Ok(Self::Limited(n as u64)),
            n => Err(format!(
                "quota limit must be >= 0 or {UNLIMITED_SENTINEL} (unlimited), got {n}"
            )),
        }
    }
}

impl From<QuotaLimit> for i64 {
    fn from(limit: QuotaLimit) -> Self {
        match limit {
            QuotaLimit::Unlimited => UNLIMITED_SENTINEL,
            QuotaLimit::Limited(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limited(n) => write!(f, "{n}"),
        }
    }
}

/// Per-principal usage counter stored inside the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub principal_id: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub usage_count: u64,
    pub limit: QuotaLimit,
}

impl QuotaRecord {
    pub fn new(principal_id: impl Into<String>, plan: impl Into<String>, limit: QuotaLimit) -> Self {
        Self {
            principal_id: principal_id.into(),
            plan: plan.into(),
            usage_count: 0,
            limit,
        }
    }
}

/// What started a scheduler run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Automatic,
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => f.write_str("automatic"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// One completed scheduler run, kept in [`AutomationConfig::history`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub summary: String,
}

/// Persisted settings and last-run bookkeeping for the recurring task.
///
/// The next due time is never stored. It is always derived from
/// `last_run_timestamp + frequency_seconds`, which is what lets a restarted
/// process pick up the same countdown it left off with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_frequency")]
    pub frequency_seconds: NonZeroU64,
    #[serde(default)]
    pub last_run_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_result: Option<String>,
    #[serde(default)]
    pub last_run_succeeded: Option<bool>,
    #[serde(default)]
    pub history: Vec<RunRecord>,
}

fn default_frequency() -> NonZeroU64 {
    DEFAULT_FREQUENCY_SECONDS
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self::new(false, DEFAULT_FREQUENCY_SECONDS)
    }
}

impl AutomationConfig {
    pub fn new(enabled: bool, frequency_seconds: NonZeroU64) -> Self {
        Self {
            enabled,
            frequency_seconds,
            last_run_timestamp: None,
            last_run_result: None,
            last_run_succeeded: None,
            history: Vec::new(),
        }
    }

    /// The instant the task becomes due, if it has ever run.
    ///
    /// Returns `None` for never-run tasks and for periods too large to
    /// represent as a timestamp.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_run_timestamp?;
        let secs = i64::try_from(self.frequency_seconds.get()).ok()?;
        last.checked_add_signed(TimeDelta::try_seconds(secs)?)
    }

    /// Whole seconds until the task is due, rounded up.
    ///
    /// `None` while disabled. A task that never ran is due immediately.
    pub fn time_left(&self, now: DateTime<Utc>) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        if self.last_run_timestamp.is_none() {
            return Some(0);
        }
        let Some(due) = self.next_run_at() else {
            return Some(u64::MAX);
        };

        let remaining_ms = (due - now).num_milliseconds();
        if remaining_ms <= 0 {
            Some(0)
        } else {
            Some((remaining_ms as u64).div_ceil(1000))
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.time_left(now) == Some(0)
    }

    /// Record a finished run.
    ///
    /// `advance_schedule` controls whether `last_run_timestamp` moves to the
    /// run's finish time. The result text and history are always updated.
    pub fn record_run(&mut self, record: RunRecord, advance_schedule: bool, history_limit: usize) {
        if advance_schedule {
            self.last_run_timestamp = Some(record.finished_at);
        }
        self.last_run_result = Some(record.summary.clone());
        self.last_run_succeeded = Some(record.succeeded);

        self.history.push(record);
        let limit = history_limit.max(1);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// The full application state aggregate.
///
/// Owned by [`crate::state::StateStore`]; everything else reads it through
/// the store's accessors and changes it through `mutate`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Bumped by the store on every mutation that changed something.
    #[serde(default)]
    pub revision: u64,

    /// Opaque domain collections rendered by the dashboard.
    #[serde(default)]
    pub collections: IndexMap<String, Vec<serde_json::Value>>,

    /// Usage counters keyed by principal id.
    #[serde(default)]
    pub quotas: IndexMap<String, QuotaRecord>,

    #[serde(default)]
    pub automation: AutomationConfig,
}

impl Snapshot {
    pub fn with_automation(automation: AutomationConfig) -> Self {
        Self {
            automation,
            ..Self::default()
        }
    }

    pub fn quota(&self, principal_id: &str) -> Option<&QuotaRecord> {
        self.quotas.get(principal_id)
    }

    pub fn collection(&self, name: &str) -> &[serde_json::Value] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
