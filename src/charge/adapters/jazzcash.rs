//! JazzCash REST adapter (MWALLET channel)
//!
//! Every request is signed with `pp_SecureHash`:
//!
//! ```text
//! message = salt & v1 & v2 & ... & vn     (values of pp* fields, sorted by name)
//! pp_SecureHash = lower_hex(HMAC-SHA256(key = salt, message))
//! ```
//!
//! Amounts travel in paisa. Timestamps are Pakistan local time
//! (`YYYYMMDDHHmmss`). The provider transaction id is `pp_TxnRefNo`, which
//! is also the inquiry key. The merchant picks it, so it is generated before
//! the call and can be stored ahead of an ambiguous reply.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use super::{HttpReply, ProviderAdapter, ProviderResponse, http_client, post_json, str_field};
use crate::charge::error::AdapterError;
use crate::charge::normalizer::StatusRules;
use crate::charge::types::{ProviderKind, Transaction};
use crate::config::JazzCashConfig;

type HmacSha256 = Hmac<Sha256>;

const INITIATE_PATH: &str = "/ApplicationAPI/API/Payment/DoTransaction";
const INQUIRE_PATH: &str = "/ApplicationAPI/API/PaymentInquiry/Inquire";

const SECURE_HASH_FIELD: &str = "pp_SecureHash";
const PKT_OFFSET_SECS: i32 = 5 * 3600;

/// Response codes meaning the request was taken
const CODE_SUCCESS: &str = "000";
const PENDING_CODES: [&str; 2] = ["124", "157"];

pub static JAZZCASH_RULES: StatusRules = StatusRules {
    error_prefix: "JAZZCASH_",
    accepted_codes: &["000", "124", "157"],
    success_statuses: &["COMPLETED", "SUCCESS", "PAID"],
    failure_statuses: &["FAILED", "REVERSED", "EXPIRED", "CANCELLED", "REJECTED"],
};

/// Signs `pp*` parameter sets with the integrity salt
#[derive(Clone)]
pub struct SecureHasher {
    salt: String,
    mac: HmacSha256,
}

impl SecureHasher {
    pub fn new(salt: &str) -> Result<Self, AdapterError> {
        let mac = HmacSha256::new_from_slice(salt.as_bytes())
            .map_err(|e| AdapterError::Parse(format!("Invalid integrity salt: {}", e)))?;
        Ok(Self {
            salt: salt.to_string(),
            mac,
        })
    }

    /// String fed to the MAC
    pub fn message(&self, params: &BTreeMap<String, String>) -> String {
        let mut message = self.salt.clone();
        for (_, value) in params
            .iter()
            .filter(|(k, _)| k.starts_with("pp") && k.as_str() != SECURE_HASH_FIELD)
        {
            message.push('&');
            message.push_str(value);
        }
        message
    }

    pub fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let mut mac = self.mac.clone();
        mac.update(self.message(params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

pub struct JazzCashAdapter {
    config: JazzCashConfig,
    base_url: String,
    hasher: SecureHasher,
    client: reqwest::Client,
}

fn pkt() -> FixedOffset {
    FixedOffset::east_opt(PKT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// `YYYYMMDDHHmmss` in Pakistan time
fn pkt_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&pkt()).format("%Y%m%d%H%M%S").to_string()
}

/// `T` + PKT time to the millisecond + two random digits (20 chars, the
/// provider's limit)
fn txn_ref_no(at: DateTime<Utc>) -> String {
    let salt = uuid::Uuid::new_v4().as_u128() % 100;
    format!(
        "T{}{:02}",
        at.with_timezone(&pkt()).format("%Y%m%d%H%M%S%3f"),
        salt
    )
}

/// Whole paisa, rounded half away from zero
fn to_paisa(amount: Decimal) -> String {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_string()
}

impl JazzCashAdapter {
    pub fn new(config: JazzCashConfig) -> Result<Self, AdapterError> {
        let client = http_client(config.timeout_secs)?;
        let hasher = SecureHasher::new(&config.integrity_salt)?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        tracing::info!(
            base_url = %base_url,
            merchant_id = %config.merchant_id,
            "Initializing JazzCash adapter"
        );

        Ok(Self {
            config,
            base_url,
            hasher,
            client,
        })
    }

    fn initiate_params(
        &self,
        reference: &str,
        amount: Decimal,
        payer: &str,
        txn_ref_no: &str,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let txn_date_time = pkt_timestamp(now);
        let expiry = pkt_timestamp(now + Duration::hours(24));

        let mut params: BTreeMap<String, String> = [
            ("pp_Amount", to_paisa(amount)),
            ("pp_BillReference", reference.to_string()),
            ("pp_Description", "MWallet One Time Payment".to_string()),
            ("pp_Language", "EN".to_string()),
            ("pp_MerchantID", self.config.merchant_id.clone()),
            ("pp_Password", self.config.password.clone()),
            ("pp_ReturnURL", self.config.return_url.clone()),
            ("pp_TxnCurrency", "PKR".to_string()),
            ("pp_TxnDateTime", txn_date_time.clone()),
            ("pp_TxnExpiryDateTime", expiry),
            ("pp_TxnRefNo", txn_ref_no.to_string()),
            ("pp_TxnType", "MWALLET".to_string()),
            ("pp_Version", "1.1".to_string()),
            ("ppmpf_1", payer.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let hash = self.hasher.sign(&params);
        params.insert(SECURE_HASH_FIELD.to_string(), hash);
        params
    }

    fn inquiry_params(&self, txn_ref_no: &str) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = [
            ("pp_MerchantID", self.config.merchant_id.clone()),
            ("pp_Password", self.config.password.clone()),
            ("pp_TxnRefNo", txn_ref_no.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let hash = self.hasher.sign(&params);
        params.insert(SECURE_HASH_FIELD.to_string(), hash);
        params
    }

    async fn call(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<ProviderResponse, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, txn_ref_no = ?params.get("pp_TxnRefNo"), "JazzCash request");

        let reply = post_json(&self.client, &url, &[], params).await?;
        let mut resp = parse_reply(reply)?;
        if resp.provider_transaction_id.is_none() {
            resp.provider_transaction_id = params.get("pp_TxnRefNo").cloned();
        }
        Ok(resp)
    }
}

/// Status implied by a payment response code
fn status_for_code(code: &str) -> Option<&'static str> {
    if code == CODE_SUCCESS {
        Some("COMPLETED")
    } else if PENDING_CODES.contains(&code) {
        Some("PENDING")
    } else {
        None
    }
}

/// Extract the uniform envelope from a JazzCash reply
fn parse_reply(reply: HttpReply) -> Result<ProviderResponse, AdapterError> {
    let is_success = reply.is_success();
    let http_status = reply.status;
    let body = reply.body;
    let response_code = str_field(&body, "pp_ResponseCode");
    let response_desc = str_field(&body, "pp_ResponseMessage");

    if !is_success {
        return match response_code {
            Some(code) => Err(AdapterError::Provider {
                code,
                message: response_desc.unwrap_or_else(|| format!("HTTP {}", http_status)),
                raw: Some(body),
            }),
            None => Err(AdapterError::Network(format!(
                "HTTP {} from JazzCash",
                http_status
            ))),
        };
    }

    // Inquiry replies carry the payment outcome separately from the call outcome
    let payment_code = str_field(&body, "pp_PaymentResponseCode");
    let transaction_status = str_field(&body, "pp_Status").or_else(|| {
        payment_code
            .as_deref()
            .or(response_code.as_deref())
            .and_then(status_for_code)
            .map(str::to_string)
    });

    let mut extra = serde_json::Map::new();
    for key in ["pp_RetreivalReferenceNo", "pp_Amount", "pp_BillReference"] {
        if let Some(v) = str_field(&body, key) {
            extra.insert(key.to_string(), Value::String(v));
        }
    }

    Ok(ProviderResponse {
        response_code,
        response_desc,
        transaction_status,
        provider_transaction_id: str_field(&body, "pp_TxnRefNo"),
        extra,
        raw: body,
    })
}

#[async_trait]
impl ProviderAdapter for JazzCashAdapter {
    fn name(&self) -> &'static str {
        "JazzCash"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::JazzCash
    }

    fn rules(&self) -> &'static StatusRules {
        &JAZZCASH_RULES
    }

    /// Inquiry needs the `pp_TxnRefNo` assigned at initiation
    fn inquiry_key(&self, txn: &Transaction) -> Option<String> {
        txn.provider_transaction_id.clone()
    }

    fn provider_ref(&self) -> Option<String> {
        Some(txn_ref_no(Utc::now()))
    }

    async fn initiate(
        &self,
        reference: &str,
        amount: Decimal,
        payer: &str,
        provider_ref: Option<&str>,
    ) -> Result<ProviderResponse, AdapterError> {
        let now = Utc::now();
        let ref_no = provider_ref.map_or_else(|| txn_ref_no(now), str::to_string);
        let params = self.initiate_params(reference, amount, payer, &ref_no, now);
        self.call(INITIATE_PATH, &params).await
    }

    async fn inquire(&self, key: &str) -> Result<ProviderResponse, AdapterError> {
        let params = self.inquiry_params(key);
        self.call(INQUIRE_PATH, &params).await
    }
}
