//! Provider Adapters
//!
//! One adapter per external wallet provider. Each adapter owns the provider's
//! wire format (field names, signing, amount units) and hands back a single
//! [`ProviderResponse`] envelope, so nothing provider-specific leaks upward.
//!
//! Adapters hold no per-request state and are shared as
//! `Arc<dyn ProviderAdapter>` across concurrent charges and scheduler ticks.

pub mod easypaisa;
pub mod jazzcash;
pub mod mock;

pub use easypaisa::EasypaisaAdapter;
pub use jazzcash::JazzCashAdapter;
pub use mock::MockProvider;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use super::error::AdapterError;
use super::normalizer::{NormalizedStatus, StatusRules, normalize};
use super::types::{ProviderKind, ProviderMeta, Transaction};

/// Uniform provider reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    /// Raw decoded body, stored as `provider_payload`
    pub raw: serde_json::Value,
    pub response_code: Option<String>,
    pub response_desc: Option<String>,
    pub transaction_status: Option<String>,
    pub provider_transaction_id: Option<String>,
    /// Extra fields surfaced to the merchant in `meta`
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProviderResponse {
    pub fn normalize(&self, rules: &StatusRules) -> NormalizedStatus {
        normalize(
            rules,
            self.transaction_status.as_deref(),
            self.response_code.as_deref(),
            self.response_desc.as_deref(),
        )
    }

    pub fn meta(&self) -> ProviderMeta {
        ProviderMeta {
            provider_status: self.transaction_status.clone(),
            provider_response_code: self.response_code.clone(),
            provider_response_desc: self.response_desc.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// Capability interface over a wallet provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get adapter name for logging
    fn name(&self) -> &'static str;

    fn kind(&self) -> ProviderKind;

    fn currency(&self) -> &'static str {
        "PKR"
    }

    /// Normalization constants for this provider
    fn rules(&self) -> &'static StatusRules;

    /// Whether `payer` has the subscriber-number shape this provider expects
    fn validate_payer(&self, payer: &str) -> bool {
        is_pk_mobile(payer)
    }

    /// Key `inquire` expects for a stored transaction.
    ///
    /// `None` means the row cannot be inquired (e.g. no provider id assigned).
    fn inquiry_key(&self, txn: &Transaction) -> Option<String>;

    /// Provider-side id to assign before the call, for providers where the
    /// merchant picks it. Persisted on a placeholder so an ambiguous
    /// initiation can still be inquired.
    fn provider_ref(&self) -> Option<String> {
        None
    }

    /// Start a charge at the provider
    ///
    /// `provider_ref` is a value previously handed out by
    /// [`provider_ref`](Self::provider_ref); adapters that assign their own
    /// ids ignore it.
    async fn initiate(
        &self,
        reference: &str,
        amount: Decimal,
        payer: &str,
        provider_ref: Option<&str>,
    ) -> Result<ProviderResponse, AdapterError>;

    /// Ask the provider for the current status of a charge
    async fn inquire(&self, key: &str) -> Result<ProviderResponse, AdapterError>;
}

/// Pakistani mobile wallet number: `03` followed by nine digits
pub fn is_pk_mobile(payer: &str) -> bool {
    payer.len() == 11 && payer.starts_with("03") && payer.bytes().all(|b| b.is_ascii_digit())
}

/// Decoded HTTP reply before provider-specific extraction
pub(crate) struct HttpReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// POST a JSON body and decode the JSON reply
///
/// Transport failures and timeouts are `Network`. A body that is not JSON is
/// `Parse` on 2xx and `Network` otherwise (a gateway error page tells us
/// nothing about the charge).
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &B,
) -> Result<HttpReply, AdapterError> {
    let mut request = client.post(url).json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AdapterError::Network(format!("HTTP request failed: {}", e)))?;

    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| AdapterError::Network(format!("Failed to read response: {}", e)))?;

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(body) => Ok(HttpReply { status, body }),
        Err(e) if (200..300).contains(&status) => {
            Err(AdapterError::Parse(format!("Failed to parse response: {}", e)))
        }
        Err(_) => Err(AdapterError::Network(format!("HTTP {} without JSON body", status))),
    }
}

/// Build a reqwest client with the provider timeout
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AdapterError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AdapterError::Network(format!("Failed to create HTTP client: {}", e)))
}

/// Read a string field that providers sometimes send as a number
pub(crate) fn str_field(body: &serde_json::Value, key: &str) -> Option<String> {
    match body.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
