//! Charge Orchestrator
//!
//! Runs the idempotent create-or-fetch protocol for an incoming charge:
//!
//! ```text
//! validate -> lookup (reference, merchant) -> hit: replay stored row
//!                                          -> miss: lock key -> lookup again
//!                                                   -> initiate -> normalize -> persist
//! ```
//!
//! A per-key async lock keeps two concurrent requests for the same
//! `(reference, merchant_id)` from both reaching the provider inside one
//! process. The store's unique constraint covers the multi-process case: a
//! `DuplicateKey` on insert is resolved by re-fetching the winner's row.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use validator::Validate;

use super::adapters::{ProviderAdapter, ProviderResponse};
use super::error::{AdapterError, ChargeError};
use super::normalizer::{HttpIntent, NormalizedStatus};
use super::store::TransactionStore;
use super::types::{
    ChargeRequest, ChargeResult, NetworkErrorPolicy, ProviderKind, ProviderMeta, StatusUpdate,
    Transaction, TransactionStatus, TxnKey,
};

type KeyLock = Arc<Mutex<()>>;

pub struct ChargeOrchestrator {
    store: Arc<dyn TransactionStore>,
    adapters: FxHashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    policy: NetworkErrorPolicy,
    locks: DashMap<(String, String), KeyLock>,
}

impl ChargeOrchestrator {
    pub fn new(store: Arc<dyn TransactionStore>, policy: NetworkErrorPolicy) -> Self {
        Self {
            store,
            adapters: FxHashMap::default(),
            policy,
            locks: DashMap::new(),
        }
    }

    /// Register an adapter; replaces any adapter of the same kind
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn policy(&self) -> NetworkErrorPolicy {
        self.policy
    }

    pub fn adapter(&self, kind: ProviderKind) -> Result<&Arc<dyn ProviderAdapter>, ChargeError> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| ChargeError::UnsupportedProvider(kind.to_string()))
    }

    /// Configured providers, in a stable order
    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Current state of a stored charge
    pub async fn get(
        &self,
        reference: &str,
        merchant_id: &str,
    ) -> Result<Option<ChargeResult>, ChargeError> {
        Ok(self
            .store
            .find_by_reference(reference, merchant_id)
            .await?
            .map(|txn| ChargeResult::from_stored(&txn)))
    }

    /// Create a charge, or replay the stored one for a known reference
    ///
    /// A replay never calls the provider.
    pub async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ChargeError> {
        req.validate()?;
        let adapter = self.adapter(req.provider)?.clone();
        if !adapter.validate_payer(&req.payer_account) {
            return Err(ChargeError::Validation(
                "mobile must be a valid Pakistani number in 03XXXXXXXXX format".to_string(),
            ));
        }

        if let Some(existing) = self.replay(&req).await? {
            return Ok(existing);
        }

        let key = (req.merchant_id.clone(), req.reference.clone());
        let lock = self.locks.entry(key.clone()).or_default().clone();

        let result = {
            let _guard = lock.lock().await;

            // A concurrent request may have finished while we waited
            match self.replay(&req).await? {
                Some(existing) => Ok(existing),
                None => match self.policy {
                    NetworkErrorPolicy::Fail => self.charge_direct(&req, adapter.as_ref()).await,
                    NetworkErrorPolicy::Pending => {
                        self.charge_with_placeholder(&req, adapter.as_ref()).await
                    }
                },
            }
        };

        drop(lock);
        self.locks.remove_if(&key, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn replay(&self, req: &ChargeRequest) -> Result<Option<ChargeResult>, ChargeError> {
        let existing = self
            .store
            .find_by_reference(&req.reference, &req.merchant_id)
            .await?;

        Ok(existing.map(|txn| {
            debug!(
                reference = %req.reference,
                merchant_id = %req.merchant_id,
                status = %txn.status,
                "Duplicate reference, returning existing transaction"
            );
            ChargeResult::from_stored(&txn)
        }))
    }

    /// Call the provider first, persist the outcome after
    async fn charge_direct(
        &self,
        req: &ChargeRequest,
        adapter: &dyn ProviderAdapter,
    ) -> Result<ChargeResult, ChargeError> {
        info!(
            reference = %req.reference,
            merchant_id = %req.merchant_id,
            provider = %req.provider,
            amount = %req.amount,
            "Initiating charge"
        );

        let provider_ref = adapter.provider_ref();
        match adapter
            .initiate(
                &req.reference,
                req.amount,
                &req.payer_account,
                provider_ref.as_deref(),
            )
            .await
        {
            Ok(resp) => {
                let normalized = resp.normalize(adapter.rules());
                let txn = Transaction::new(req, adapter.currency(), normalized.status)
                    .with_update(&response_update(&resp, None));

                match self.persist(&txn).await? {
                    Persisted::Created(stored) => {
                        Ok(fresh_result(&stored, &normalized, resp.meta()))
                    }
                    Persisted::Existing(result) => Ok(result),
                }
            }
            Err(AdapterError::Provider { code, message, raw }) => {
                let failure = provider_failure(adapter, &code, &message);
                let txn = Transaction::new(req, adapter.currency(), TransactionStatus::Failed)
                    .with_update(&rejection_update(&code, &message, raw));

                match self.persist(&txn).await? {
                    Persisted::Created(stored) => {
                        Ok(fresh_result(&stored, &failure, rejection_meta(&code, &message)))
                    }
                    Persisted::Existing(result) => Ok(result),
                }
            }
            Err(e) => {
                warn!(
                    reference = %req.reference,
                    merchant_id = %req.merchant_id,
                    provider = %req.provider,
                    error = %e,
                    "Charge initiation failed with ambiguous outcome, nothing persisted"
                );
                Err(ChargeError::Network(e.to_string()))
            }
        }
    }

    /// Persist a PENDING placeholder, then call the provider
    ///
    /// An ambiguous provider failure leaves the placeholder for the scheduler.
    async fn charge_with_placeholder(
        &self,
        req: &ChargeRequest,
        adapter: &dyn ProviderAdapter,
    ) -> Result<ChargeResult, ChargeError> {
        // A merchant-assigned provider id keeps an ambiguous placeholder inquirable
        let provider_ref = adapter.provider_ref();
        let mut placeholder = Transaction::new(req, adapter.currency(), TransactionStatus::Pending);
        placeholder.provider_transaction_id = provider_ref.clone();
        let placeholder = match self.persist(&placeholder).await? {
            Persisted::Created(stored) => stored,
            Persisted::Existing(result) => return Ok(result),
        };
        let key = TxnKey::of(&placeholder);

        info!(
            reference = %req.reference,
            merchant_id = %req.merchant_id,
            provider = %req.provider,
            amount = %req.amount,
            provider_ref = ?provider_ref,
            "Initiating charge (placeholder persisted)"
        );

        match adapter
            .initiate(
                &req.reference,
                req.amount,
                &req.payer_account,
                provider_ref.as_deref(),
            )
            .await
        {
            Ok(resp) => {
                let normalized = resp.normalize(adapter.rules());
                let update = response_update(&resp, Some(normalized.status));
                let stored = self.apply(&key, &update, placeholder).await?;
                Ok(fresh_result(&stored, &normalized, resp.meta()))
            }
            Err(AdapterError::Provider { code, message, raw }) => {
                let failure = provider_failure(adapter, &code, &message);
                let mut update = rejection_update(&code, &message, raw);
                update.status = Some(TransactionStatus::Failed);
                let stored = self.apply(&key, &update, placeholder).await?;
                Ok(fresh_result(&stored, &failure, rejection_meta(&code, &message)))
            }
            Err(e) => {
                warn!(
                    reference = %req.reference,
                    merchant_id = %req.merchant_id,
                    provider = %req.provider,
                    error = %e,
                    "Charge initiation outcome unknown, left PENDING for reconciliation"
                );
                let mut result = ChargeResult::from_stored(&placeholder);
                result.replayed = false;
                Ok(result)
            }
        }
    }

    async fn apply(
        &self,
        key: &TxnKey,
        update: &StatusUpdate,
        fallback: Transaction,
    ) -> Result<Transaction, ChargeError> {
        Ok(self
            .store
            .update_status(key, update)
            .await?
            .unwrap_or(fallback))
    }

    /// Insert, resolving a lost insert race by re-fetching the winner
    async fn persist(&self, txn: &Transaction) -> Result<Persisted, ChargeError> {
        match self.store.create(txn).await {
            Ok(stored) => {
                info!(
                    txn_id = %stored.txn_id,
                    reference = %stored.reference,
                    status = %stored.status,
                    provider_txn_id = ?stored.provider_transaction_id,
                    "✅ Transaction persisted"
                );
                Ok(Persisted::Created(stored))
            }
            Err(ChargeError::DuplicateKey(_)) => {
                let existing = self
                    .store
                    .find_by_reference(&txn.reference, &txn.merchant_id)
                    .await?
                    .ok_or_else(|| {
                        ChargeError::System(format!(
                            "Duplicate key for {} but no row found",
                            txn.reference
                        ))
                    })?;
                warn!(
                    reference = %txn.reference,
                    merchant_id = %txn.merchant_id,
                    "Lost insert race, returning existing transaction"
                );
                Ok(Persisted::Existing(ChargeResult::from_stored(&existing)))
            }
            Err(e) => Err(e),
        }
    }
}

enum Persisted {
    Created(Transaction),
    Existing(ChargeResult),
}

fn response_update(resp: &ProviderResponse, status: Option<TransactionStatus>) -> StatusUpdate {
    StatusUpdate {
        status,
        provider_transaction_id: resp.provider_transaction_id.clone(),
        provider_response_code: resp.response_code.clone(),
        provider_response_desc: resp.response_desc.clone(),
        provider_payload: Some(resp.raw.clone()),
    }
}

fn rejection_update(code: &str, message: &str, raw: Option<serde_json::Value>) -> StatusUpdate {
    StatusUpdate {
        status: None,
        provider_transaction_id: None,
        provider_response_code: Some(code.to_string()),
        provider_response_desc: Some(message.to_string()),
        provider_payload: raw,
    }
}

fn rejection_meta(code: &str, message: &str) -> ProviderMeta {
    ProviderMeta {
        provider_response_code: Some(code.to_string()),
        provider_response_desc: Some(message.to_string()),
        ..Default::default()
    }
}

fn provider_failure(adapter: &dyn ProviderAdapter, code: &str, message: &str) -> NormalizedStatus {
    NormalizedStatus {
        status: TransactionStatus::Failed,
        success: false,
        http_intent: HttpIntent::Rejected,
        error_code: Some(format!("{}{}", adapter.rules().error_prefix, code)),
        error_message: Some(message.to_string()),
    }
}

fn fresh_result(txn: &Transaction, normalized: &NormalizedStatus, meta: ProviderMeta) -> ChargeResult {
    ChargeResult {
        success: normalized.success,
        reference: txn.reference.clone(),
        status: txn.status,
        provider: txn.provider,
        amount: txn.amount,
        currency: txn.currency.clone(),
        provider_transaction_id: txn.provider_transaction_id.clone(),
        error_code: normalized.error_code.clone(),
        error_message: normalized.error_message.clone(),
        meta,
        http_intent: normalized.http_intent,
        replayed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge::adapters::MockProvider;
    use crate::charge::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn setup(policy: NetworkErrorPolicy) -> (ChargeOrchestrator, Arc<MemoryStore>, Arc<MockProvider>) {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockProvider::new());
        let orch = ChargeOrchestrator::new(store.clone(), policy).with_adapter(mock.clone());
        (orch, store, mock)
    }

    fn request(reference: &str) -> ChargeRequest {
        ChargeRequest::new(
            "M-1",
            reference,
            Decimal::new(100, 0),
            "03001234567",
            ProviderKind::Mock,
        )
    }

    #[tokio::test]
    async fn test_validation_rejects_before_provider_call() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Fail);

        let mut bad_mobile = request("ORD-1");
        bad_mobile.payer_account = "12345".into();
        assert!(matches!(
            orch.charge(bad_mobile).await,
            Err(ChargeError::Validation(_))
        ));

        let mut bad_amount = request("ORD-1");
        bad_amount.amount = Decimal::ZERO;
        assert!(matches!(
            orch.charge(bad_amount).await,
            Err(ChargeError::Validation(_))
        ));

        assert_eq!(mock.initiate_count(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_unsupported() {
        let (orch, _, _) = setup(NetworkErrorPolicy::Fail);
        let mut req = request("ORD-1");
        req.provider = ProviderKind::JazzCash;

        assert!(matches!(
            orch.charge(req).await,
            Err(ChargeError::UnsupportedProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_success_is_persisted() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Fail);
        mock.push_initiate(Ok(MockProvider::reply("0000", Some("PAID"))));

        let result = orch.charge(request("ORD-1")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, TransactionStatus::Success);
        assert_eq!(result.http_intent, HttpIntent::Ok);
        assert!(!result.replayed);

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.provider_transaction_id, result.provider_transaction_id);
        assert!(stored.provider_payload.is_some());
    }

    #[tokio::test]
    async fn test_replay_does_not_call_provider() {
        let (orch, _, mock) = setup(NetworkErrorPolicy::Fail);

        let first = orch.charge(request("ORD-1")).await.unwrap();
        let second = orch.charge(request("ORD-1")).await.unwrap();

        assert_eq!(mock.initiate_count(), 1);
        assert_eq!(first.status, TransactionStatus::Pending);
        assert_eq!(second.status, first.status);
        assert_eq!(second.provider_transaction_id, first.provider_transaction_id);
        assert!(second.replayed);
    }

    #[tokio::test]
    async fn test_provider_rejection_persists_failed_row() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Fail);
        mock.push_initiate(Err(AdapterError::Provider {
            code: "0013".into(),
            message: "Invalid account".into(),
            raw: None,
        }));

        let result = orch.charge(request("ORD-1")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, TransactionStatus::Failed);
        assert_eq!(result.error_code.as_deref(), Some("MOCK_0013"));
        assert_eq!(result.error_message.as_deref(), Some("Invalid account"));

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.provider_response_code.as_deref(), Some("0013"));

        // A retry of the same reference is an idempotent hit
        let replay = orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(replay.error_code.as_deref(), Some("TRANSACTION_FAILED"));
        assert_eq!(mock.initiate_count(), 1);
    }

    #[tokio::test]
    async fn test_network_error_fail_policy_persists_nothing() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Fail);
        mock.push_initiate(Err(AdapterError::Network("timeout".into())));

        let err = orch.charge(request("ORD-1")).await.unwrap_err();
        assert!(matches!(err, ChargeError::Network(_)));
        assert!(store.is_empty().await);

        // Without a row the next request reaches the provider again
        let retry = orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(retry.status, TransactionStatus::Pending);
        assert_eq!(mock.initiate_count(), 2);
    }

    #[tokio::test]
    async fn test_network_error_pending_policy_keeps_placeholder() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Pending);
        mock.push_initiate(Err(AdapterError::Network("timeout".into())));

        let result = orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);
        assert_eq!(result.http_intent, HttpIntent::Accepted);
        assert!(!result.replayed);

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);

        // The placeholder makes the retry an idempotent hit
        orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(mock.initiate_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_policy_updates_placeholder_on_reply() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Pending);
        mock.push_initiate(Ok(MockProvider::reply("0000", Some("PAID"))));

        let result = orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Success);

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Success);
        assert!(stored.provider_transaction_id.is_some());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_placeholder_carries_assigned_provider_ref() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Pending);
        mock.set_assigns_refs(true);
        mock.push_initiate(Err(AdapterError::Network("timeout".into())));

        let result = orch.charge(request("ORD-1")).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        let assigned = stored.provider_transaction_id.expect("id assigned before the call");
        assert!(assigned.starts_with("MOCK-"));
        assert_eq!(result.provider_transaction_id.as_deref(), Some(assigned.as_str()));
    }

    #[tokio::test]
    async fn test_jazzcash_placeholder_keeps_txn_ref_no_on_network_error() {
        use crate::charge::adapters::JazzCashAdapter;
        use crate::config::JazzCashConfig;

        let adapter = JazzCashAdapter::new(JazzCashConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            merchant_id: "MC123".to_string(),
            password: "pw".to_string(),
            integrity_salt: "s4lt".to_string(),
            return_url: String::new(),
            timeout_secs: 2,
        })
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        let orch = ChargeOrchestrator::new(store.clone(), NetworkErrorPolicy::Pending)
            .with_adapter(Arc::new(adapter));

        let mut req = request("ORD-1");
        req.provider = ProviderKind::JazzCash;
        let result = orch.charge(req).await.unwrap();
        assert_eq!(result.status, TransactionStatus::Pending);

        let stored = store.find_by_reference("ORD-1", "M-1").await.unwrap().unwrap();
        let txn_ref_no = stored.provider_transaction_id.expect("pp_TxnRefNo persisted");
        assert_eq!(txn_ref_no.len(), 20);
        assert!(txn_ref_no.starts_with('T'));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_call_provider_once() {
        let (orch, store, mock) = setup(NetworkErrorPolicy::Fail);
        mock.set_latency(Duration::from_millis(50));
        let orch = Arc::new(orch);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.charge(request("ORD-1")).await })
            })
            .collect();

        let results: Vec<ChargeResult> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(mock.initiate_count(), 1);
        assert_eq!(store.len().await, 1);
        let ids: Vec<_> = results.iter().map(|r| &r.provider_transaction_id).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert!(orch.locks.is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_stored_state() {
        let (orch, _, _) = setup(NetworkErrorPolicy::Fail);
        assert!(orch.get("ORD-1", "M-1").await.unwrap().is_none());

        orch.charge(request("ORD-1")).await.unwrap();
        let got = orch.get("ORD-1", "M-1").await.unwrap().unwrap();
        assert_eq!(got.status, TransactionStatus::Pending);
        assert!(orch.get("ORD-1", "M-2").await.unwrap().is_none());
    }
}
