//! Integration tests for QuotaGate check-and-increment
//!
//! These tests verify that the QuotaGate correctly:
//! - Allows exactly `limit` metered calls and denies the next one
//! - Never touches usage for unlimited plans
//! - Stays atomic when many tasks check the same principal at once

use std::sync::Arc;
use syncdeck::models::{QuotaConfig, QuotaLimit, QuotaRecord};
use syncdeck::remote::MemoryRemoteStore;
use syncdeck::{QuotaDecision, QuotaGate, Snapshot, StateStore, StoreOptions};

async fn gate_with(records: &[(&str, u64, QuotaLimit)]) -> (QuotaGate, Arc<MemoryRemoteStore>) {
    let mut snapshot = Snapshot::default();
    for (principal_id, usage, limit) in records {
        let mut record = QuotaRecord::new(*principal_id, "custom", *limit);
        record.usage_count = *usage;
        snapshot.quotas.insert(principal_id.to_string(), record);
    }

    let remote = Arc::new(MemoryRemoteStore::with_snapshot(&snapshot));
    let store = StateStore::new(remote.clone(), StoreOptions::default());
    store.ensure_ready().await.unwrap();
    (QuotaGate::new(store, QuotaConfig::default()), remote)
}

#[tokio::test]
async fn test_limit_100_usage_99_scenario() {
    let (gate, _) = gate_with(&[("alice", 99, QuotaLimit::Limited(100))]).await;

    assert_eq!(
        gate.check_and_increment("alice", true).unwrap(),
        QuotaDecision {
            allowed: true,
            usage: 100,
            limit: QuotaLimit::Limited(100),
        }
    );
    assert_eq!(
        gate.check_and_increment("alice", true).unwrap(),
        QuotaDecision {
            allowed: false,
            usage: 100,
            limit: QuotaLimit::Limited(100),
        }
    );
}

#[tokio::test]
async fn test_exactly_limit_calls_allowed() {
    let (gate, _) = gate_with(&[("bob", 0, QuotaLimit::Limited(25))]).await;

    for i in 1..=25 {
        let decision = gate.check_and_increment("bob", true).unwrap();
        assert!(decision.allowed, "call {} should be allowed", i);
        assert_eq!(decision.usage, i);
    }

    let denied = gate.check_and_increment("bob", true).unwrap();
    assert!(!denied.allowed);
    assert_eq!(gate.usage("bob").unwrap().unwrap().usage_count, 25);
}

#[tokio::test]
async fn test_unlimited_sentinel_allows_everything() {
    let (gate, _) = gate_with(&[("corp", 7, QuotaLimit::Unlimited)]).await;

    for _ in 0..1_000 {
        assert!(gate.check_and_increment("corp", true).unwrap().allowed);
    }
    assert_eq!(gate.usage("corp").unwrap().unwrap().usage_count, 7);
}

#[tokio::test]
async fn test_unlimited_survives_remote_round_trip() {
    let (_, remote) = gate_with(&[("corp", 0, QuotaLimit::Unlimited)]).await;
    let raw = remote.raw_payload().unwrap();

    assert!(raw.contains("\"limit\": -1"), "unexpected payload: {}", raw);
    assert_eq!(
        remote.stored().unwrap().quota("corp").unwrap().limit,
        QuotaLimit::Unlimited
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_never_exceed_limit() {
    let (gate, _) = gate_with(&[("shared", 0, QuotaLimit::Limited(50))]).await;
    let gate = Arc::new(gate);

    let mut handles = vec![];
    for _ in 0..8 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            let mut allowed = 0u64;
            for _ in 0..20 {
                if gate.check_and_increment("shared", true).unwrap().allowed {
                    allowed += 1;
                }
            }
            allowed
        }));
    }

    let mut total_allowed = 0;
    for handle in handles {
        total_allowed += handle.await.unwrap();
    }

    assert_eq!(total_allowed, 50);
    assert_eq!(gate.usage("shared").unwrap().unwrap().usage_count, 50);
}
