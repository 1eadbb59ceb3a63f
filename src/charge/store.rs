//! Transaction Store
//!
//! Keyed record store consumed by the orchestrator and the scheduler.
//! Two implementations: [`MemoryStore`] here and
//! [`PgTransactionStore`](super::db::PgTransactionStore) for PostgreSQL.
//!
//! # Invariants
//!
//! 1. At most one row per `(reference, merchant_id)`; `create` on an existing
//!    key fails with `DuplicateKey`.
//! 2. `update_status` only mutates rows that are still PENDING. A terminal row
//!    is returned unchanged.
//! 3. `completed_at` is set once, on the first transition into a terminal
//!    status. `updated_at` is refreshed by every applied update.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::error::ChargeError;
use super::types::{StatusUpdate, Transaction, TransactionStatus, TxnKey};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn find_by_reference(
        &self,
        reference: &str,
        merchant_id: &str,
    ) -> Result<Option<Transaction>, ChargeError>;

    /// `merchant_id = None` searches across merchants
    async fn find_by_provider_txn_id(
        &self,
        provider_txn_id: &str,
        merchant_id: Option<&str>,
    ) -> Result<Option<Transaction>, ChargeError>;

    /// Insert a new row. Fails with `DuplicateKey` if the key exists.
    async fn create(&self, txn: &Transaction) -> Result<Transaction, ChargeError>;

    /// Apply the non-`None` fields of `update` to a PENDING row
    ///
    /// Returns the row after the update, the unchanged row if it was already
    /// terminal, or `None` if no row matches `key`.
    async fn update_status(
        &self,
        key: &TxnKey,
        update: &StatusUpdate,
    ) -> Result<Option<Transaction>, ChargeError>;

    /// PENDING rows whose `updated_at` is older than `threshold`, oldest first
    async fn list_pending_older_than(
        &self,
        threshold: Duration,
        limit: u32,
    ) -> Result<Vec<Transaction>, ChargeError>;
}

type RowKey = (String, String);

fn row_key(merchant_id: &str, reference: &str) -> RowKey {
    (merchant_id.to_string(), reference.to_string())
}

/// In-process store for tests and local runs without PostgreSQL
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<RowKey, Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Shift a row's `created_at` and `updated_at` into the past
    pub async fn backdate(&self, reference: &str, merchant_id: &str, by: chrono::Duration) -> bool {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&row_key(merchant_id, reference)) {
            Some(txn) => {
                txn.created_at -= by;
                txn.updated_at -= by;
                true
            }
            None => false,
        }
    }

    fn resolve<'a>(
        rows: &'a mut HashMap<RowKey, Transaction>,
        key: &TxnKey,
    ) -> Option<&'a mut Transaction> {
        match key {
            TxnKey::Reference {
                reference,
                merchant_id,
            } => rows.get_mut(&row_key(merchant_id, reference)),
            TxnKey::ProviderTxnId {
                provider_transaction_id,
                merchant_id,
            } => rows.values_mut().find(|t| {
                t.provider_transaction_id.as_deref() == Some(provider_transaction_id.as_str())
                    && merchant_id.as_deref().is_none_or(|m| m == t.merchant_id)
            }),
        }
    }
}

/// Apply an update in place, honouring the store invariants
pub(crate) fn apply_update(txn: &mut Transaction, update: &StatusUpdate) {
    if txn.status.is_terminal() {
        return;
    }

    let now = Utc::now();
    if let Some(status) = update.status {
        txn.status = status;
        if status.is_terminal() && txn.completed_at.is_none() {
            txn.completed_at = Some(now);
        }
    }
    if let Some(id) = &update.provider_transaction_id {
        txn.provider_transaction_id = Some(id.clone());
    }
    if let Some(code) = &update.provider_response_code {
        txn.provider_response_code = Some(code.clone());
    }
    if let Some(desc) = &update.provider_response_desc {
        txn.provider_response_desc = Some(desc.clone());
    }
    if let Some(payload) = &update.provider_payload {
        txn.provider_payload = Some(payload.clone());
    }
    txn.updated_at = now;
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn find_by_reference(
        &self,
        reference: &str,
        merchant_id: &str,
    ) -> Result<Option<Transaction>, ChargeError> {
        let rows = self.rows.read().await;
        Ok(rows.get(&row_key(merchant_id, reference)).cloned())
    }

    async fn find_by_provider_txn_id(
        &self,
        provider_txn_id: &str,
        merchant_id: Option<&str>,
    ) -> Result<Option<Transaction>, ChargeError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|t| {
                t.provider_transaction_id.as_deref() == Some(provider_txn_id)
                    && merchant_id.is_none_or(|m| m == t.merchant_id)
            })
            .cloned())
    }

    async fn create(&self, txn: &Transaction) -> Result<Transaction, ChargeError> {
        let mut rows = self.rows.write().await;
        let key = row_key(&txn.merchant_id, &txn.reference);
        if rows.contains_key(&key) {
            return Err(ChargeError::DuplicateKey(txn.reference.clone()));
        }
        rows.insert(key, txn.clone());
        Ok(txn.clone())
    }

    async fn update_status(
        &self,
        key: &TxnKey,
        update: &StatusUpdate,
    ) -> Result<Option<Transaction>, ChargeError> {
        let mut rows = self.rows.write().await;
        Ok(Self::resolve(&mut rows, key).map(|txn| {
            apply_update(txn, update);
            txn.clone()
        }))
    }

    async fn list_pending_older_than(
        &self,
        threshold: Duration,
        limit: u32,
    ) -> Result<Vec<Transaction>, ChargeError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| ChargeError::System(format!("Invalid threshold: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let rows = self.rows.read().await;
        let mut pending: Vec<Transaction> = rows
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.updated_at < cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.updated_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}
