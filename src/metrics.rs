// Operational metrics for the sync core
//
// Lightweight counters shared by the store, writer, quota gate and scheduler

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Core performance and outcome counters
///
/// Uses atomic operations so every component can record through a shared
/// `Arc<Metrics>` without locking. Counters are logged on shutdown and can be
/// logged periodically by the host.
#[derive(Debug)]
pub struct Metrics {
    /// Mutations that changed the snapshot
    pub mutations: AtomicU64,

    /// Change events broadcast to subscribers
    pub change_events: AtomicU64,

    /// Change events dropped because nobody was subscribed
    pub change_events_unobserved: AtomicU64,

    /// Change events that re-armed an already pending write
    pub coalesced_changes: AtomicU64,

    /// Successful full-snapshot writes to the remote store
    pub flushes: AtomicU64,

    /// Failed writes (logged and dropped)
    pub flush_failures: AtomicU64,

    /// Writes held back because the store booted Degraded
    pub flushes_withheld: AtomicU64,

    /// Quota checks that were allowed
    pub quota_allowed: AtomicU64,

    /// Quota checks that were denied
    pub quota_denied: AtomicU64,

    /// Scheduler runs started
    pub runs_started: AtomicU64,

    /// Scheduler runs whose task failed
    pub runs_failed: AtomicU64,

    /// Triggers ignored because a run was already in progress
    pub runs_skipped: AtomicU64,

    /// Total task run time in milliseconds
    pub total_run_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            mutations: AtomicU64::new(0),
            change_events: AtomicU64::new(0),
            change_events_unobserved: AtomicU64::new(0),
            coalesced_changes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            flushes_withheld: AtomicU64::new(0),
            quota_allowed: AtomicU64::new(0),
            quota_denied: AtomicU64::new(0),
            runs_started: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_skipped: AtomicU64::new(0),
            total_run_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_change_event(&self, observed: bool) {
        self.change_events.fetch_add(1, Ordering::Relaxed);
        if !observed {
            self.change_events_unobserved.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_coalesced_change(&self) {
        self.coalesced_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, succeeded: bool) {
        if succeeded {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flush_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_flush_withheld(&self) {
        self.flushes_withheld.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_check(&self, allowed: bool) {
        if allowed {
            self.quota_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.quota_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_finished(&self, succeeded: bool, duration: Duration) {
        if !succeeded {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_run_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_run_skipped(&self) {
        self.runs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average task run time in milliseconds
    pub fn avg_run_time_ms(&self) -> f64 {
        let total = self.total_run_time_ms.load(Ordering::Relaxed);
        let count = self.runs_started.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Sync Core Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Mutations: {}, change events: {} ({} unobserved, {} coalesced)",
            self.mutations.load(Ordering::Relaxed),
            self.change_events.load(Ordering::Relaxed),
            self.change_events_unobserved.load(Ordering::Relaxed),
            self.coalesced_changes.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Flushes: {} ok, {} failed, {} withheld",
            self.flushes.load(Ordering::Relaxed),
            self.flush_failures.load(Ordering::Relaxed),
            self.flushes_withheld.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Quota checks: {} allowed, {} denied",
            self.quota_allowed.load(Ordering::Relaxed),
            self.quota_denied.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Scheduler runs: {} started, {} failed, {} skipped (avg {:.2}ms)",
            self.runs_started.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.runs_skipped.load(Ordering::Relaxed),
            self.avg_run_time_ms()
        );
    }

    /// One-line summary for long-running hosts
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} mutations, {} flushes, {} runs, uptime {:.0}s",
            self.mutations.load(Ordering::Relaxed),
            self.flushes.load(Ordering::Relaxed),
            self.runs_started.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
