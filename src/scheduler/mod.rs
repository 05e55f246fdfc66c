//! Recurring task driver with a drift-tolerant countdown.
//!
//! The next due time is never kept in memory. Every tick recomputes it from
//! the `last_run_timestamp` persisted in the snapshot, so a restarted process
//! resumes the same countdown instead of starting a fresh period.
//!
//! Automatic and manual triggers share one running flag. A trigger that
//! arrives while a run is in progress is ignored, not queued, and reported as
//! [`RunOutcome::Skipped`].

mod clock;
mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use runner::{
    CommandTaskRunner, MAX_SUMMARY_CHARS, RunContext, TaskError, TaskRunner, last_line,
    truncate_summary,
};

#[cfg(test)]
pub use runner::MockTaskRunner;

use crate::models::{AutomationConfig, FailurePolicy, RunRecord, RunTrigger, SchedulerConfig};
use crate::state::{StateStore, StoreError};
use crate::sync::FlushHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("frequency must be at least one second, got {0}")]
    InvalidFrequency(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Disabled,
    Idle,
    Running,
}

/// What subscribers see on every tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub phase: SchedulerPhase,
    /// Whole seconds until the next automatic run; `None` while disabled.
    pub time_left_secs: Option<u64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub last_succeeded: Option<bool>,
}

impl SchedulerStatus {
    fn from_automation(automation: &AutomationConfig, running: bool, now: DateTime<Utc>) -> Self {
        let phase = if running {
            SchedulerPhase::Running
        } else if automation.enabled {
            SchedulerPhase::Idle
        } else {
            SchedulerPhase::Disabled
        };

        Self {
            phase,
            time_left_secs: automation.time_left(now),
            last_run: automation.last_run_timestamp,
            last_result: automation.last_run_result.clone(),
            last_succeeded: automation.last_run_succeeded,
        }
    }
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            phase: SchedulerPhase::Disabled,
            time_left_secs: None,
            last_run: None,
            last_result: None,
            last_succeeded: None,
        }
    }
}

/// Result of a trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { run_id: Uuid, summary: String },
    Failed { run_id: Uuid, error: TaskError },
    /// Another run was in progress; nothing was started.
    Skipped,
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

pub struct SchedulerOptions {
    pub tick_interval: Duration,
    pub failure_policy: FailurePolicy,
    pub history_limit: usize,
    pub clock: Arc<dyn Clock>,
    /// Written through immediately after each run when set.
    pub flush: Option<FlushHandle>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            failure_policy: config.failure_policy,
            history_limit: config.history_limit,
            clock: Arc::new(SystemClock),
            flush: None,
        }
    }
}

struct SchedulerInner {
    store: StateStore,
    runner: Arc<dyn TaskRunner>,
    options: SchedulerOptions,
    running: AtomicBool,
    status: watch::Sender<SchedulerStatus>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the running flag when a run ends, including by cancellation.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a [`TaskRunner`] on the period stored in the snapshot's
/// [`AutomationConfig`].
///
/// Cloning is cheap; clones share the same running flag and ticker.
///
/// # States
///
/// - `Disabled` <-> `Idle` through [`set_enabled`](Self::set_enabled)
/// - `Idle` -> `Running` when the countdown reaches zero or on
///   [`run_now`](Self::run_now)
/// - `Running` -> `Idle` once the result is recorded
#[derive(Clone)]
pub struct AutomationScheduler {
    inner: Arc<SchedulerInner>,
}

impl AutomationScheduler {
    pub fn new(store: StateStore, runner: Arc<dyn TaskRunner>, options: SchedulerOptions) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::default());
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                runner,
                options,
                running: AtomicBool::new(false),
                status,
                cancel: CancellationToken::new(),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Start the periodic tick. Calling it again while ticking does nothing.
    pub fn spawn(&self) {
        let mut ticker = self.inner.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }

        // The ticker holds a weak reference so dropping the last scheduler
        // handle cancels it.
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self.inner.options.tick_interval;

        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let scheduler = AutomationScheduler { inner };
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = scheduler.tick() => {}
                        }
                    }
                }
            }
            tracing::debug!("scheduler ticker stopped");
        }));

        tracing::info!("scheduler started, ticking every {:?}", period);
    }

    /// Stop ticking and wait for the ticker to exit.
    ///
    /// An automatic run in progress is abandoned; its result is not recorded.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ticker = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                tracing::error!("scheduler ticker failed: {}", e);
            }
        }
    }

    /// Recompute the countdown and run the task if it is due.
    ///
    /// Returns the outcome when a run was started by this tick.
    pub async fn tick(&self) -> Option<RunOutcome> {
        let now = self.inner.options.clock.now();
        let automation = match self.inner.store.read(|s| s.automation.clone()) {
            Ok(automation) => automation,
            Err(e) => {
                tracing::trace!("tick skipped: {}", e);
                return None;
            }
        };

        self.publish(&automation, now);

        if !automation.is_due(now) {
            return None;
        }
        if self.is_running() {
            tracing::trace!("task due but a run is in progress");
            return None;
        }
        Some(self.execute(RunTrigger::Automatic).await)
    }

    /// Run the task now, whatever the countdown says.
    ///
    /// Works while disabled too. A completed run moves `last_run_timestamp`,
    /// which reschedules the next automatic run one full period out.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Store`] if the store has not finished bootstrapping.
    pub async fn run_now(&self) -> Result<RunOutcome, SchedulerError> {
        self.inner.store.read(|_| ())?;
        Ok(self.execute(RunTrigger::Manual).await)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), SchedulerError> {
        let changed = self.inner.store.mutate(|s| {
            let changed = s.automation.enabled != enabled;
            s.automation.enabled = enabled;
            changed
        })?;

        if changed {
            tracing::info!(enabled, "automation toggled");
            self.refresh();
            self.request_flush();
        }
        Ok(())
    }

    pub fn set_frequency(&self, seconds: u64) -> Result<(), SchedulerError> {
        let frequency = NonZeroU64::new(seconds).ok_or(SchedulerError::InvalidFrequency(seconds))?;
        let changed = self.inner.store.mutate(|s| {
            let changed = s.automation.frequency_seconds != frequency;
            s.automation.frequency_seconds = frequency;
            changed
        })?;

        if changed {
            tracing::info!(frequency_seconds = seconds, "automation frequency changed");
            self.refresh();
            self.request_flush();
        }
        Ok(())
    }

    /// Seconds until the next automatic run at `now`; `None` while disabled.
    pub fn compute_time_left(&self, now: DateTime<Utc>) -> Result<Option<u64>, SchedulerError> {
        Ok(self.inner.store.read(|s| s.automation.time_left(now))?)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch countdown and phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.status.subscribe()
    }

    async fn execute(&self, trigger: RunTrigger) -> RunOutcome {
        let inner = &self.inner;
        let metrics = inner.store.metrics();

        if inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%trigger, "run already in progress; ignoring trigger");
            metrics.record_run_skipped();
            return RunOutcome::Skipped;
        }
        let guard = RunningGuard(&inner.running);

        let ctx = RunContext {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: inner.options.clock.now(),
        };
        let run_id = ctx.run_id;
        let started_at = ctx.started_at;

        metrics.record_run_started();
        self.refresh();
        tracing::info!(%run_id, %trigger, "task run started");

        let timer = std::time::Instant::now();
        let result = inner.runner.run(ctx).await;
        let finished_at = inner.options.clock.now();
        metrics.record_run_finished(result.is_ok(), timer.elapsed());

        let (succeeded, summary) = match &result {
            Ok(summary) => {
                tracing::info!(%run_id, summary = %summary, "task run completed");
                (true, truncate_summary(summary))
            }
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "task run failed");
                (false, truncate_summary(&e.to_string()))
            }
        };

        let record = RunRecord {
            run_id,
            trigger,
            started_at,
            finished_at,
            succeeded,
            summary,
        };
        let advance = succeeded || inner.options.failure_policy.advances_on_failure();
        let history_limit = inner.options.history_limit;

        if let Err(e) = inner
            .store
            .mutate(|s| s.automation.record_run(record, advance, history_limit))
        {
            tracing::warn!(%run_id, error = %e, "could not record run result");
        }

        if let Some(flush) = &inner.options.flush {
            if let Err(e) = flush.flush_now().await {
                tracing::warn!(%run_id, error = %e, "run result not persisted");
            }
        }

        drop(guard);
        self.refresh();

        match result {
            Ok(summary) => RunOutcome::Completed { run_id, summary },
            Err(error) => RunOutcome::Failed { run_id, error },
        }
    }

    fn refresh(&self) {
        let now = self.inner.options.clock.now();
        if let Ok(automation) = self.inner.store.read(|s| s.automation.clone()) {
            self.publish(&automation, now);
        }
    }

    fn publish(&self, automation: &AutomationConfig, now: DateTime<Utc>) {
        let next = SchedulerStatus::from_automation(automation, self.is_running(), now);
        self.inner.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    fn request_flush(&self) {
        if let Some(flush) = &self.inner.options.flush {
            flush.request();
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Snapshot;
    use crate::remote::MemoryRemoteStore;
    use crate::state::StoreOptions;
    use chrono::TimeDelta;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    async fn store_with(automation: AutomationConfig) -> StateStore {
        let remote = Arc::new(MemoryRemoteStore::with_snapshot(&Snapshot::with_automation(automation)));
        let store = StateStore::new(remote, StoreOptions::default());
        store.ensure_ready().await.unwrap();
        store
    }

    fn options(clock: Arc<ManualClock>) -> SchedulerOptions {
        SchedulerOptions {
            clock,
            ..SchedulerOptions::default()
        }
    }

    fn daily(enabled: bool, last_run: Option<DateTime<Utc>>) -> AutomationConfig {
        let mut automation = AutomationConfig::new(enabled, NonZeroU64::new(86_400).unwrap());
        automation.last_run_timestamp = last_run;
        automation
    }

    /// Runner that blocks until released, counting concurrent invocations.
    #[derive(Default)]
    struct GatedRunner {
        release: Notify,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TaskRunner for GatedRunner {
        async fn run(&self, _ctx: RunContext) -> Result<String, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.release.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("gated".to_string())
        }
    }

    #[tokio::test]
    async fn test_due_exactly_one_period_later_runs_once() {
        let clock = Arc::new(ManualClock::new(epoch() + TimeDelta::seconds(86_400)));
        let store = store_with(daily(true, Some(epoch()))).await;

        let mut runner = MockTaskRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok("indexed 3 sources".to_string()));

        let scheduler = AutomationScheduler::new(store.clone(), Arc::new(runner), options(clock.clone()));
        assert_eq!(scheduler.compute_time_left(clock.now()).unwrap(), Some(0));

        let outcome = scheduler.tick().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { ref summary, .. } if summary == "indexed 3 sources"));

        // The next tick at the same instant sees a full period ahead
        assert!(scheduler.tick().await.is_none());
        assert_eq!(scheduler.compute_time_left(clock.now()).unwrap(), Some(86_400));

        let automation = store.read(|s| s.automation.clone()).unwrap();
        assert_eq!(automation.last_run_timestamp, Some(clock.now()));
        assert_eq!(automation.last_run_result.as_deref(), Some("indexed 3 sources"));
        assert_eq!(automation.history.len(), 1);
    }

    #[tokio::test]
    async fn test_countdown_resumes_from_persisted_timestamp() {
        let clock = Arc::new(ManualClock::new(epoch() + TimeDelta::seconds(1_000)));
        let store = store_with(daily(true, Some(epoch()))).await;

        let mut runner = MockTaskRunner::new();
        runner.expect_run().times(0);
        let scheduler = AutomationScheduler::new(store, Arc::new(runner), options(clock.clone()));

        assert!(scheduler.tick().await.is_none());
        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Idle);
        assert_eq!(status.time_left_secs, Some(85_400));

        clock.advance(TimeDelta::seconds(400));
        scheduler.tick().await;
        assert_eq!(scheduler.status().time_left_secs, Some(85_000));
    }

    #[tokio::test]
    async fn test_never_run_and_enabled_is_due() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(true, None)).await;

        let mut runner = MockTaskRunner::new();
        runner.expect_run().times(1).returning(|_| Ok("first".to_string()));
        let scheduler = AutomationScheduler::new(store, Arc::new(runner), options(clock));

        assert!(scheduler.tick().await.is_some());
    }

    #[tokio::test]
    async fn test_disabled_never_runs_automatically() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(false, None)).await;

        let mut runner = MockTaskRunner::new();
        runner.expect_run().times(1).returning(|_| Ok("manual".to_string()));
        let scheduler = AutomationScheduler::new(store, Arc::new(runner), options(clock));

        assert!(scheduler.tick().await.is_none());
        assert_eq!(scheduler.status().phase, SchedulerPhase::Disabled);
        assert_eq!(scheduler.status().time_left_secs, None);

        // Manual trigger ignores the enabled flag
        assert!(matches!(
            scheduler.run_now().await.unwrap(),
            RunOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_run_now_while_running_is_skipped() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(true, None)).await;
        let runner = Arc::new(GatedRunner::default());
        let scheduler = AutomationScheduler::new(store, runner.clone(), options(clock));

        let background = scheduler.clone();
        let first = tokio::spawn(async move { background.run_now().await });
        while !scheduler.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status().phase, SchedulerPhase::Running);

        assert_eq!(scheduler.run_now().await.unwrap(), RunOutcome::Skipped);
        // An automatic tick at the same instant is not a second invocation either
        assert!(scheduler.tick().await.is_none());

        runner.release.notify_one();
        assert!(matches!(first.await.unwrap().unwrap(), RunOutcome::Completed { .. }));

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_failure_policy_advance() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(true, None)).await;

        let mut runner = MockTaskRunner::new();
        runner
            .expect_run()
            .returning(|_| Err(TaskError::Failed("upstream 502".to_string())));
        let scheduler = AutomationScheduler::new(store.clone(), Arc::new(runner), options(clock.clone()));

        let outcome = scheduler.run_now().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let automation = store.read(|s| s.automation.clone()).unwrap();
        assert_eq!(automation.last_run_timestamp, Some(clock.now()));
        assert_eq!(automation.last_run_succeeded, Some(false));
        assert_eq!(automation.last_run_result.as_deref(), Some("task failed: upstream 502"));
    }

    #[tokio::test]
    async fn test_failure_policy_retry_keeps_task_due() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(true, None)).await;

        let mut runner = MockTaskRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_| Err(TaskError::Timeout(Duration::from_secs(1))));
        let scheduler = AutomationScheduler::new(
            store.clone(),
            Arc::new(runner),
            SchedulerOptions {
                failure_policy: FailurePolicy::Retry,
                ..options(clock.clone())
            },
        );

        assert!(scheduler.tick().await.is_some());
        assert!(scheduler.tick().await.is_some());
        assert_eq!(store.read(|s| s.automation.last_run_timestamp).unwrap(), None);
        assert_eq!(store.read(|s| s.automation.history.len()).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_frequency_and_enabled() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(false, Some(epoch()))).await;
        let scheduler = AutomationScheduler::new(store.clone(), Arc::new(MockTaskRunner::new()), options(clock));

        assert_eq!(
            scheduler.set_frequency(0),
            Err(SchedulerError::InvalidFrequency(0))
        );

        scheduler.set_frequency(60).unwrap();
        scheduler.set_enabled(true).unwrap();

        let status = scheduler.status();
        assert_eq!(status.phase, SchedulerPhase::Idle);
        assert_eq!(status.time_left_secs, Some(60));
        assert_eq!(store.read(|s| s.automation.frequency_seconds.get()).unwrap(), 60);
    }

    #[tokio::test]
    async fn test_run_now_before_ready_is_error() {
        let store = StateStore::new(Arc::new(MemoryRemoteStore::new()), StoreOptions::default());
        let scheduler = AutomationScheduler::new(store, Arc::new(MockTaskRunner::new()), SchedulerOptions::default());

        assert!(matches!(
            scheduler.run_now().await,
            Err(SchedulerError::Store(StoreError::NotReady(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_runs_due_task_and_stops_on_shutdown() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = store_with(daily(true, None)).await;

        let mut runner = MockTaskRunner::new();
        runner.expect_run().times(1).returning(|_| Ok("tick".to_string()));
        let scheduler = AutomationScheduler::new(store.clone(), Arc::new(runner), options(clock));

        scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.shutdown().await;

        assert_eq!(store.read(|s| s.automation.history.len()).unwrap(), 1);
        assert_eq!(store.metrics().runs_started.load(Ordering::Relaxed), 1);
    }
}
