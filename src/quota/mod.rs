//! Per-principal usage quotas.
//!
//! Usage counters live inside the snapshot as [`QuotaRecord`]s, so they are
//! persisted alongside everything else. [`QuotaGate::check_and_increment`]
//! does the read-compare-write inside a single [`StateStore::mutate`] call,
//! which is what keeps two concurrent checks from both slipping under the
//! limit.
//!
//! Exceeding a quota is an expected outcome and comes back as a
//! [`QuotaDecision`] with `allowed == false`, never as an error.

use crate::models::{QuotaConfig, QuotaLimit, QuotaRecord};
use crate::state::{StateStore, StoreError};
use crate::sync::FlushHandle;
use serde::Serialize;
use thiserror::Error;

/// Result of a quota check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Usage after this call.
    pub usage: u64,
    pub limit: QuotaLimit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Atomic check-and-increment over the usage counters in the snapshot.
pub struct QuotaGate {
    store: StateStore,
    config: QuotaConfig,
    flush: Option<FlushHandle>,
}

impl QuotaGate {
    pub fn new(store: StateStore, config: QuotaConfig) -> Self {
        Self {
            store,
            config,
            flush: None,
        }
    }

    /// Ask the sync writer for a write after every counter change.
    pub fn with_flush(mut self, flush: FlushHandle) -> Self {
        self.flush = Some(flush);
        self
    }

    /// Limit for a plan name. Unknown plans fall back to the default plan,
    /// and to a zero limit if that is missing too.
    pub fn plan_limit(&self, plan: &str) -> QuotaLimit {
        self.config
            .plans
            .get(plan)
            .or_else(|| self.config.plans.get(&self.config.default_plan))
            .copied()
            .unwrap_or(QuotaLimit::Limited(0))
    }

    /// Limit currently in force for a record: its plan's entry in the plan
    /// table, or the stored limit if the plan is not in the table.
    fn effective_limit(&self, record: &QuotaRecord) -> QuotaLimit {
        self.config.plans.get(&record.plan).copied().unwrap_or(record.limit)
    }

    /// Check whether `principal_id` may consume one more unit, and consume it
    /// if `metered`.
    ///
    /// - the limit is looked up from the principal's plan on every call
    /// - unlimited plans are always allowed and usage is left untouched
    /// - `usage >= limit` is denied and usage is left untouched
    /// - otherwise allowed; metered calls increment usage by exactly one
    ///
    /// A principal seen for the first time is judged against the default
    /// plan. Its record is only created by a metered call that was allowed.
    ///
    /// # Errors
    ///
    /// Only [`StoreError`] when the store has not finished bootstrapping.
    pub fn check_and_increment(
        &self,
        principal_id: &str,
        metered: bool,
    ) -> Result<QuotaDecision, StoreError> {
        let default_plan = self.config.default_plan.as_str();
        let default_limit = self.plan_limit(default_plan);

        let (decision, incremented) = self.store.mutate(|snapshot| {
            match snapshot.quotas.get_mut(principal_id) {
                Some(record) => {
                    let limit = self.effective_limit(record);
                    apply_limit(record, limit);
                    consume(record, metered)
                }
                None => {
                    let mut record = QuotaRecord::new(principal_id, default_plan, default_limit);
                    let outcome = consume(&mut record, metered);
                    if outcome.1 {
                        snapshot.quotas.insert(principal_id.to_string(), record);
                    }
                    outcome
                }
            }
        })?;

        self.store.metrics().record_quota_check(decision.allowed);
        if decision.allowed {
            tracing::trace!(principal_id, usage = decision.usage, limit = %decision.limit, "quota check allowed");
        } else {
            tracing::debug!(principal_id, usage = decision.usage, limit = %decision.limit, "quota exceeded");
        }

        if incremented {
            self.request_flush();
        }
        Ok(decision)
    }

    /// Move a principal onto `plan`.
    ///
    /// Usage carries over, clamped to the new limit: a principal moved to a
    /// smaller plan while over its allowance sits at the new ceiling and is
    /// denied until [`reset_usage`](Self::reset_usage).
    pub fn assign_plan(&self, principal_id: &str, plan: &str) -> Result<QuotaRecord, QuotaError> {
        let limit = self
            .config
            .plans
            .get(plan)
            .copied()
            .ok_or_else(|| QuotaError::UnknownPlan(plan.to_string()))?;

        let (record, clamped_from) = self.store.mutate(|snapshot| {
            let record = snapshot
                .quotas
                .entry(principal_id.to_string())
                .or_insert_with(|| QuotaRecord::new(principal_id, plan, limit));
            let before = record.usage_count;
            record.plan = plan.to_string();
            apply_limit(record, limit);
            let clamped_from = (record.usage_count != before).then_some(before);
            (record.clone(), clamped_from)
        })?;

        if let Some(before) = clamped_from {
            tracing::info!(principal_id, plan, from = before, to = record.usage_count, "usage clamped to new plan limit");
        }
        tracing::info!(principal_id, plan, limit = %limit, "quota plan assigned");
        self.request_flush();
        Ok(record)
    }

    /// Current record for a principal, if it has one.
    pub fn usage(&self, principal_id: &str) -> Result<Option<QuotaRecord>, StoreError> {
        self.store.read(|snapshot| snapshot.quota(principal_id).cloned())
    }

    /// Zero a principal's usage counter.
    ///
    /// There is no built-in cycle; callers decide when a usage period ends.
    /// Returns false if the principal has no record.
    pub fn reset_usage(&self, principal_id: &str) -> Result<bool, StoreError> {
        let found = self.store.mutate(|snapshot| match snapshot.quotas.get_mut(principal_id) {
            Some(record) => {
                record.usage_count = 0;
                true
            }
            None => false,
        })?;

        if found {
            tracing::info!(principal_id, "quota usage reset");
            self.request_flush();
        }
        Ok(found)
    }

    fn request_flush(&self) {
        if let Some(flush) = &self.flush {
            flush.request();
        }
    }
}

/// Set `limit` on the record. Usage never stays above a finite limit.
fn apply_limit(record: &mut QuotaRecord, limit: QuotaLimit) {
    record.limit = limit;
    if let QuotaLimit::Limited(max) = limit {
        record.usage_count = record.usage_count.min(max);
    }
}

/// Returns the decision and whether usage was incremented.
fn consume(record: &mut QuotaRecord, metered: bool) -> (QuotaDecision, bool) {
    if record.limit.is_unlimited() {
        return (decision_for(true, record), false);
    }
    if !record.limit.has_headroom(record.usage_count) {
        return (decision_for(false, record), false);
    }
    if metered {
        record.usage_count += 1;
    }
    (decision_for(true, record), metered)
}

fn decision_for(allowed: bool, record: &QuotaRecord) -> QuotaDecision {
    QuotaDecision {
        allowed,
        usage: record.usage_count,
        limit: record.limit,
    }
}
