//! End-to-end charge and reconciliation scenarios
//!
//! Drives the orchestrator and scheduler against `MockProvider` and
//! `MemoryStore`. Rows are backdated by an hour so the wall-clock eligibility
//! filter admits them; every backoff decision then uses the injected tick time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use wallet_reconciler::charge::scheduler::MAX_ATTEMPTS_REASON;
use wallet_reconciler::charge::{
    AdapterError, ChargeOrchestrator, ChargeRequest, MemoryStore, MockProvider,
    NetworkErrorPolicy, ProviderKind, ReconciliationScheduler, StatusUpdate, Transaction,
    TransactionStatus, TransactionStore, TxnKey,
};

const MERCHANT: &str = "M";

struct Harness {
    orchestrator: Arc<ChargeOrchestrator>,
    store: Arc<MemoryStore>,
    mock: Arc<MockProvider>,
    scheduler: ReconciliationScheduler,
}

fn harness(policy: NetworkErrorPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mock = Arc::new(MockProvider::new());
    let orchestrator =
        Arc::new(ChargeOrchestrator::new(store.clone(), policy).with_adapter(mock.clone()));
    let scheduler = ReconciliationScheduler::with_defaults(orchestrator.clone());
    Harness {
        orchestrator,
        store,
        mock,
        scheduler,
    }
}

fn charge_request(reference: &str) -> ChargeRequest {
    ChargeRequest::new(
        MERCHANT,
        reference,
        Decimal::new(100, 0),
        "03001234567",
        ProviderKind::Mock,
    )
}

impl Harness {
    async fn stored(&self, reference: &str) -> Transaction {
        self.store
            .find_by_reference(reference, MERCHANT)
            .await
            .unwrap()
            .expect("row exists")
    }

    /// Age the row so the store lists it, return its `updated_at`
    async fn age(&self, reference: &str) -> DateTime<Utc> {
        assert!(
            self.store
                .backdate(reference, MERCHANT, chrono::Duration::hours(1))
                .await
        );
        self.stored(reference).await.updated_at
    }
}

fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}

#[tokio::test]
async fn test_scenario_a_success_on_initiate() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .push_initiate(Ok(MockProvider::reply("success", Some("PAID"))));

    let result = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(h.stored("ORD-1").await.status, TransactionStatus::Success);
    assert!(h.stored("ORD-1").await.completed_at.is_some());
}

#[tokio::test]
async fn test_scenario_b_repeat_reference_is_replayed() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .push_initiate(Ok(MockProvider::reply("success", Some("PAID"))));

    let first = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    let second = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();

    assert_eq!(h.mock.initiate_count(), 1);
    assert_eq!(second.status, first.status);
    assert_eq!(second.provider_transaction_id, first.provider_transaction_id);
    assert!(second.replayed);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_scenario_c_unknown_status_resolved_by_inquiry() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .push_initiate(Ok(MockProvider::reply("0000", Some("INITIATED"))));
    h.mock.push_inquiry(Ok(MockProvider::reply("0000", Some("PAID"))));

    let result = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Pending);
    assert!(result.success);

    let base = h.age("ORD-1").await;
    let pending = h.stored("ORD-1").await;
    let provider_id = pending.provider_transaction_id.clone().expect("id from initiate");

    let report = h.scheduler.tick_at(at(base, 20)).await.unwrap();
    assert_eq!(report.resolved, 1);

    let txn = h.stored("ORD-1").await;
    assert_eq!(txn.status, TransactionStatus::Success);
    assert!(txn.completed_at.is_some());
    assert_eq!(txn.provider_transaction_id.as_deref(), Some(provider_id.as_str()));
    assert_eq!(h.scheduler.attempts_for(&pending.retry_key()), None);
    assert_eq!(h.mock.inquired_keys(), vec![provider_id]);
}

#[tokio::test]
async fn test_scenario_d_retry_budget_exhausted() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .set_default_inquiry(Ok(MockProvider::reply("0000", Some("PENDING"))));

    h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    let base = h.age("ORD-1").await;

    for (attempt, secs) in [20, 40, 120, 300, 600].into_iter().enumerate() {
        let report = h.scheduler.tick_at(at(base, secs)).await.unwrap();
        assert_eq!(report.still_pending, 1, "attempt {} should inquire", attempt + 1);
        assert_eq!(h.stored("ORD-1").await.status, TransactionStatus::Pending);
    }
    assert_eq!(h.mock.inquiry_count(), 5);

    let report = h.scheduler.tick_at(at(base, 600)).await.unwrap();
    assert_eq!(report.force_failed, 1);
    assert_eq!(report.inquired, 0);
    assert_eq!(h.mock.inquiry_count(), 5);

    let txn = h.stored("ORD-1").await;
    assert_eq!(txn.status, TransactionStatus::Failed);
    assert_eq!(txn.provider_response_desc.as_deref(), Some(MAX_ATTEMPTS_REASON));
    assert_eq!(h.scheduler.attempts_for(&txn.retry_key()), None);

    // Nothing left to do
    let report = h.scheduler.tick_at(at(base, 1200)).await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_backoff_only_fires_when_interval_elapsed() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .set_default_inquiry(Ok(MockProvider::reply("0000", Some("PENDING"))));
    h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    let base = h.age("ORD-1").await;

    // (elapsed, expected inquiry count afterwards)
    let ticks = [
        (19, 0),
        (20, 1),
        (39, 1),
        (40, 2),
        (100, 2),
        (120, 3),
        (299, 3),
        (300, 4),
        (599, 4),
        (600, 5),
    ];
    for (secs, expected) in ticks {
        h.scheduler.tick_at(at(base, secs)).await.unwrap();
        assert_eq!(h.mock.inquiry_count(), expected, "after tick at +{}s", secs);
    }
}

#[tokio::test]
async fn test_concurrent_charges_call_provider_once() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock.set_latency(Duration::from_millis(50));
    h.mock
        .push_initiate(Ok(MockProvider::reply("0000", Some("PAID"))));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.charge(charge_request("ORD-1")).await })
        })
        .collect();

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap().unwrap().status);
    }

    assert_eq!(h.mock.initiate_count(), 1);
    let stored = h.stored("ORD-1").await.status;
    assert!(statuses.iter().all(|s| *s == stored));
    assert_eq!(stored, TransactionStatus::Success);
}

#[tokio::test]
async fn test_terminal_status_never_changes() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .push_initiate(Ok(MockProvider::reply("0000", Some("FAILED"))));

    let result = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("MOCK_0000"));

    let before = h.stored("ORD-1").await;
    let key = TxnKey::reference("ORD-1", MERCHANT);
    let after = h
        .store
        .update_status(&key, &StatusUpdate::status(TransactionStatus::Success))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, TransactionStatus::Failed);
    assert_eq!(after.completed_at, before.completed_at);

    // Terminal rows are never listed, so the scheduler cannot touch them
    let base = h.age("ORD-1").await;
    let report = h.scheduler.tick_at(at(base, 600)).await.unwrap();
    assert_eq!(report.examined, 0);

    let replay = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(replay.status, TransactionStatus::Failed);
    assert_eq!(replay.error_code.as_deref(), Some("TRANSACTION_FAILED"));
    assert_eq!(h.mock.initiate_count(), 1);
}

#[tokio::test]
async fn test_pending_policy_placeholder_is_reconciled() {
    let h = harness(NetworkErrorPolicy::Pending);
    h.mock
        .push_initiate(Err(AdapterError::Network("connection reset".into())));
    h.mock.push_inquiry(Ok(MockProvider::reply("0000", Some("PAID"))));

    let result = h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Pending);

    // Replay must not reach the provider again
    h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(h.mock.initiate_count(), 1);

    let base = h.age("ORD-1").await;
    h.scheduler.tick_at(at(base, 20)).await.unwrap();

    // No provider id was assigned, so the mock is inquired by reference
    assert_eq!(h.mock.inquired_keys(), vec!["ORD-1".to_string()]);
    assert_eq!(h.stored("ORD-1").await.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_pending_policy_placeholder_with_assigned_ref() {
    let h = harness(NetworkErrorPolicy::Pending);
    h.mock.set_assigns_refs(true);
    h.mock
        .push_initiate(Err(AdapterError::Network("read timeout".into())));
    h.mock.push_inquiry(Ok(MockProvider::reply("0000", Some("PAID"))));

    h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    let assigned = h
        .stored("ORD-1")
        .await
        .provider_transaction_id
        .expect("assigned before initiation");

    let base = h.age("ORD-1").await;
    let report = h.scheduler.tick_at(at(base, 20)).await.unwrap();
    assert_eq!(report.resolved, 1);

    // Inquired by the id assigned up front, which the row keeps
    assert_eq!(h.mock.inquired_keys(), vec![assigned.clone()]);
    let txn = h.stored("ORD-1").await;
    assert_eq!(txn.status, TransactionStatus::Success);
    assert_eq!(txn.provider_transaction_id, Some(assigned));
}

#[tokio::test]
async fn test_distinct_charges_get_distinct_provider_ids() {
    let h = harness(NetworkErrorPolicy::Fail);
    let a = h.orchestrator.charge(charge_request("ORD-A")).await.unwrap();
    let b = h.orchestrator.charge(charge_request("ORD-B")).await.unwrap();

    assert!(a.provider_transaction_id.is_some());
    assert_ne!(a.provider_transaction_id, b.provider_transaction_id);
}

#[tokio::test]
async fn test_fail_policy_network_error_persists_nothing() {
    let h = harness(NetworkErrorPolicy::Fail);
    h.mock
        .push_initiate(Err(AdapterError::Network("timeout".into())));

    let err = h
        .orchestrator
        .charge(charge_request("ORD-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NETWORK_ERROR");
    assert!(h.store.is_empty().await);

    // Without a row, a retry reaches the provider again
    h.orchestrator.charge(charge_request("ORD-1")).await.unwrap();
    assert_eq!(h.mock.initiate_count(), 2);
}
