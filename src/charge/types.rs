//! Charge Core Types
//!
//! Type definitions shared by the orchestrator, the scheduler, the stores and
//! the provider adapters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::normalizer::HttpIntent;

/// Internal row identifier - ULID, sortable and coordination-free
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialized as its 26-character ULID string
impl Serialize for TransactionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Canonical transaction status
///
/// `Pending` is the only non-terminal state. Once a row is `Success` or
/// `Failed` it never changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    /// Storage / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Which external provider handled a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Easypaisa,
    JazzCash,
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Easypaisa => "easypaisa",
            ProviderKind::JazzCash => "jazzcash",
            ProviderKind::Mock => "mock",
        }
    }

    /// Provider channel recorded with each row
    pub fn channel(&self) -> &'static str {
        match self {
            ProviderKind::Easypaisa => "MA",
            ProviderKind::JazzCash => "MWALLET",
            ProviderKind::Mock => "MOCK",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    /// Case-insensitive, so `"JazzCash"` from a client resolves
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easypaisa" => Ok(ProviderKind::Easypaisa),
            "jazzcash" => Ok(ProviderKind::JazzCash),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(format!("unsupported payment method: {}", other)),
        }
    }
}

/// What the orchestrator does when `initiate` fails at the transport level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkErrorPolicy {
    /// Return FAILED to the caller and persist nothing
    #[default]
    Fail,
    /// Persist a PENDING placeholder before the call and let the scheduler
    /// resolve the ambiguous outcome through inquiry
    Pending,
}

/// Transaction record stored in the transaction store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub txn_id: TransactionId,
    /// Merchant-supplied idempotency key
    pub reference: String,
    pub merchant_id: String,
    pub provider: ProviderKind,
    pub channel: String,
    pub amount: Decimal,
    pub currency: String,
    /// Subscriber number debited by the provider
    pub payer_account: String,
    pub status: TransactionStatus,
    pub provider_transaction_id: Option<String>,
    pub provider_response_code: Option<String>,
    pub provider_response_desc: Option<String>,
    /// Raw snapshot of the last provider response
    pub provider_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once, on the first transition into a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Build a record for a charge that has not been written yet
    pub fn new(req: &ChargeRequest, currency: &str, status: TransactionStatus) -> Self {
        let now = Utc::now();
        Self {
            txn_id: TransactionId::new(),
            reference: req.reference.clone(),
            merchant_id: req.merchant_id.clone(),
            provider: req.provider,
            channel: req.provider.channel().to_string(),
            amount: req.amount,
            currency: currency.to_string(),
            payer_account: req.payer_account.clone(),
            status,
            provider_transaction_id: None,
            provider_response_code: None,
            provider_response_desc: None,
            provider_payload: None,
            created_at: now,
            updated_at: now,
            completed_at: status.is_terminal().then_some(now),
        }
    }

    /// Copy the provider fields of an update onto a fresh record
    pub fn with_update(mut self, update: &StatusUpdate) -> Self {
        if let Some(status) = update.status {
            self.status = status;
            if status.is_terminal() && self.completed_at.is_none() {
                self.completed_at = Some(self.updated_at);
            }
        }
        if update.provider_transaction_id.is_some() {
            self.provider_transaction_id = update.provider_transaction_id.clone();
        }
        if update.provider_response_code.is_some() {
            self.provider_response_code = update.provider_response_code.clone();
        }
        if update.provider_response_desc.is_some() {
            self.provider_response_desc = update.provider_response_desc.clone();
        }
        if update.provider_payload.is_some() {
            self.provider_payload = update.provider_payload.clone();
        }
        self
    }

    /// Key the scheduler's attempt cache uses for this row
    ///
    /// Unique per row; provider ids are not guaranteed unique across rows.
    pub fn retry_key(&self) -> String {
        format!("{}:{}", self.merchant_id, self.reference)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] ref={} merchant={} provider={} amount={} {} status={}",
            self.txn_id,
            self.reference,
            self.merchant_id,
            self.provider,
            self.amount,
            self.currency,
            self.status
        )
    }
}

/// Partial update applied by the store; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<TransactionStatus>,
    pub provider_transaction_id: Option<String>,
    pub provider_response_code: Option<String>,
    pub provider_response_desc: Option<String>,
    pub provider_payload: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.provider_response_desc = Some(desc.into());
        self
    }
}

/// Lookup key for store updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnKey {
    Reference {
        reference: String,
        merchant_id: String,
    },
    ProviderTxnId {
        provider_transaction_id: String,
        merchant_id: Option<String>,
    },
}

impl TxnKey {
    pub fn reference(reference: impl Into<String>, merchant_id: impl Into<String>) -> Self {
        TxnKey::Reference {
            reference: reference.into(),
            merchant_id: merchant_id.into(),
        }
    }

    pub fn of(txn: &Transaction) -> Self {
        Self::reference(txn.reference.clone(), txn.merchant_id.clone())
    }
}

impl fmt::Display for TxnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnKey::Reference {
                reference,
                merchant_id,
            } => write!(f, "{}/{}", merchant_id, reference),
            TxnKey::ProviderTxnId {
                provider_transaction_id,
                merchant_id,
            } => write!(
                f,
                "{}/provider:{}",
                merchant_id.as_deref().unwrap_or("*"),
                provider_transaction_id
            ),
        }
    }
}

/// Incoming charge request
#[derive(Debug, Clone, Validate)]
pub struct ChargeRequest {
    #[validate(length(min = 1, message = "merchant id is required"))]
    pub merchant_id: String,
    #[validate(length(min = 1, max = 64, message = "reference is required and must be at most 64 characters"))]
    pub reference: String,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    pub payer_account: String,
    pub provider: ProviderKind,
}

impl ChargeRequest {
    pub fn new(
        merchant_id: impl Into<String>,
        reference: impl Into<String>,
        amount: Decimal,
        payer_account: impl Into<String>,
        provider: ProviderKind,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            reference: reference.into(),
            amount,
            payer_account: payer_account.into(),
            provider,
        }
    }
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount").with_message("amount must be a positive number".into()))
    }
}

/// Provider fields echoed back to the merchant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMeta {
    pub provider_status: Option<String>,
    pub provider_response_code: Option<String>,
    pub provider_response_desc: Option<String>,
    /// Provider-specific extras (payment tokens, echoed amounts)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Caller-facing result of a charge or a status lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResult {
    pub success: bool,
    pub reference: String,
    pub status: TransactionStatus,
    #[serde(rename = "paymentMethod")]
    pub provider: ProviderKind,
    pub amount: Decimal,
    pub currency: String,
    #[serde(rename = "transactionId")]
    pub provider_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub meta: ProviderMeta,
    #[serde(skip)]
    pub http_intent: HttpIntent,
    /// True when the result came from an existing row (no provider call)
    #[serde(skip)]
    pub replayed: bool,
}

impl ChargeResult {
    /// Result for a row that already exists in the store
    pub fn from_stored(txn: &Transaction) -> Self {
        let (success, error_code, error_message) = match txn.status {
            TransactionStatus::Failed => (
                false,
                Some("TRANSACTION_FAILED".to_string()),
                Some("Transaction failed".to_string()),
            ),
            _ => (true, None, None),
        };

        Self {
            success,
            reference: txn.reference.clone(),
            status: txn.status,
            provider: txn.provider,
            amount: txn.amount,
            currency: txn.currency.clone(),
            provider_transaction_id: txn.provider_transaction_id.clone(),
            error_code,
            error_message,
            meta: ProviderMeta {
                provider_status: txn
                    .provider_payload
                    .as_ref()
                    .and_then(|p| p.get("transactionStatus"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string),
                provider_response_code: txn.provider_response_code.clone(),
                provider_response_desc: txn.provider_response_desc.clone(),
                extra: serde_json::Map::new(),
            },
            http_intent: HttpIntent::for_status(txn.status),
            replayed: true,
        }
    }
}
