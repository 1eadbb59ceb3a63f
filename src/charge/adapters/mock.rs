//! Scripted provider
//!
//! Replies come from per-operation queues; when a queue is empty the default
//! reply is used, with a fresh provider transaction id each time. Counts
//! every call so tests can assert on provider traffic.
//! Also backs `providers.mock` for local runs without provider credentials.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use super::{ProviderAdapter, ProviderResponse};
use crate::charge::error::AdapterError;
use crate::charge::normalizer::StatusRules;
use crate::charge::types::{ProviderKind, Transaction};

pub static MOCK_RULES: StatusRules = StatusRules {
    error_prefix: "MOCK_",
    accepted_codes: &["0000", "0001", "success"],
    success_statuses: &["PAID", "PAID_AND_SETTLED"],
    failure_statuses: &["FAILED", "REVERSED", "EXPIRED", "CANCELLED"],
};

type Scripted = Result<ProviderResponse, AdapterError>;

pub struct MockProvider {
    initiate_script: Mutex<VecDeque<Scripted>>,
    inquiry_script: Mutex<VecDeque<Scripted>>,
    default_initiate: Mutex<Scripted>,
    default_inquiry: Mutex<Scripted>,
    latency: Mutex<Option<Duration>>,
    assigns_refs: AtomicBool,
    initiate_count: AtomicUsize,
    inquiry_count: AtomicUsize,
    inquired_keys: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProvider {
    /// Initiate answers PENDING, inquiry answers PAID
    pub fn new() -> Self {
        Self {
            initiate_script: Mutex::new(VecDeque::new()),
            inquiry_script: Mutex::new(VecDeque::new()),
            default_initiate: Mutex::new(Ok(Self::reply("0000", Some("INITIATED")))),
            default_inquiry: Mutex::new(Ok(Self::reply("0000", Some("PAID")))),
            latency: Mutex::new(None),
            assigns_refs: AtomicBool::new(false),
            initiate_count: AtomicUsize::new(0),
            inquiry_count: AtomicUsize::new(0),
            inquired_keys: Mutex::new(Vec::new()),
        }
    }

    /// Build a reply envelope with a fresh provider transaction id
    pub fn reply(code: &str, status: Option<&str>) -> ProviderResponse {
        let txn_id = fresh_id();
        ProviderResponse {
            raw: json!({
                "responseCode": code,
                "transactionStatus": status,
                "transactionId": txn_id,
            }),
            response_code: Some(code.to_string()),
            response_desc: Some(format!("mock {}", code)),
            transaction_status: status.map(str::to_string),
            provider_transaction_id: Some(txn_id),
            extra: serde_json::Map::new(),
        }
    }

    pub fn push_initiate(&self, reply: Scripted) {
        lock(&self.initiate_script).push_back(reply);
    }

    pub fn push_inquiry(&self, reply: Scripted) {
        lock(&self.inquiry_script).push_back(reply);
    }

    pub fn set_default_initiate(&self, reply: Scripted) {
        *lock(&self.default_initiate) = reply;
    }

    pub fn set_default_inquiry(&self, reply: Scripted) {
        *lock(&self.default_inquiry) = reply;
    }

    /// Hand out provider ids before initiation, like JazzCash's `pp_TxnRefNo`
    pub fn set_assigns_refs(&self, assigns: bool) {
        self.assigns_refs.store(assigns, Ordering::SeqCst);
    }

    /// Delay every call, to widen race windows in concurrency tests
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    pub fn initiate_count(&self) -> usize {
        self.initiate_count.load(Ordering::SeqCst)
    }

    pub fn inquiry_count(&self) -> usize {
        self.inquiry_count.load(Ordering::SeqCst)
    }

    pub fn inquired_keys(&self) -> Vec<String> {
        lock(&self.inquired_keys).clone()
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn fresh_id() -> String {
    format!("MOCK-{}", uuid::Uuid::new_v4().simple())
}

/// Replace the provider id of a successful reply, keeping `raw` in step
fn with_id(reply: Scripted, id: String) -> Scripted {
    reply.map(|mut resp| {
        if let Some(body) = resp.raw.as_object_mut() {
            body.insert("transactionId".to_string(), json!(id));
        }
        resp.provider_transaction_id = Some(id);
        resp
    })
}

/// Each default reply stands for a distinct provider transaction
fn default_reply(default: &Mutex<Scripted>) -> Scripted {
    let reply = lock(default).clone();
    match &reply {
        Ok(resp) if resp.provider_transaction_id.is_some() => with_id(reply, fresh_id()),
        _ => reply,
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn rules(&self) -> &'static StatusRules {
        &MOCK_RULES
    }

    fn inquiry_key(&self, txn: &Transaction) -> Option<String> {
        txn.provider_transaction_id
            .clone()
            .or_else(|| Some(txn.reference.clone()))
    }

    fn provider_ref(&self) -> Option<String> {
        self.assigns_refs.load(Ordering::SeqCst).then(fresh_id)
    }

    async fn initiate(
        &self,
        _reference: &str,
        _amount: Decimal,
        _payer: &str,
        provider_ref: Option<&str>,
    ) -> Result<ProviderResponse, AdapterError> {
        self.initiate_count.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let scripted = lock(&self.initiate_script).pop_front();
        let reply = scripted.unwrap_or_else(|| default_reply(&self.default_initiate));
        match provider_ref {
            Some(id) => with_id(reply, id.to_string()),
            None => reply,
        }
    }

    async fn inquire(&self, key: &str) -> Result<ProviderResponse, AdapterError> {
        self.inquiry_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.inquired_keys).push(key.to_string());
        self.delay().await;

        let scripted = lock(&self.inquiry_script).pop_front();
        scripted.unwrap_or_else(|| default_reply(&self.default_inquiry))
    }
}
