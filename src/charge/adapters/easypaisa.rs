//! Easypaisa REST adapter (Mobile Account channel)
//!
//! Authenticates with a static `Credentials: base64(username:password)` header.
//! Inquiry is keyed by the merchant reference, sent as `orderId`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Value, json};
use tracing::debug;

use super::{HttpReply, ProviderAdapter, ProviderResponse, http_client, post_json, str_field};
use crate::charge::error::AdapterError;
use crate::charge::normalizer::StatusRules;
use crate::charge::types::{ProviderKind, Transaction};
use crate::config::EasypaisaConfig;

const INITIATE_PATH: &str = "/easypay-service/rest/v4/initiate-ma-transaction";
const INQUIRE_PATH: &str = "/easypay-service/rest/v4/inquire-transaction";

pub static EASYPAISA_RULES: StatusRules = StatusRules {
    error_prefix: "EASYPAY_",
    accepted_codes: &["0000", "0001"],
    success_statuses: &["PAID", "PAID_AND_SETTLED"],
    failure_statuses: &["FAILED", "REVERSED", "EXPIRED", "CANCELLED"],
};

pub struct EasypaisaAdapter {
    config: EasypaisaConfig,
    base_url: String,
    credentials: String,
    client: reqwest::Client,
}

impl EasypaisaAdapter {
    pub fn new(config: EasypaisaConfig) -> Result<Self, AdapterError> {
        let client = http_client(config.timeout_secs)?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let credentials = BASE64.encode(format!("{}:{}", config.username, config.password));

        tracing::info!(
            base_url = %base_url,
            store_id = %config.store_id,
            "Initializing Easypaisa adapter"
        );

        Ok(Self {
            config,
            base_url,
            credentials,
            client,
        })
    }

    /// `storeId` goes out as a number when it is one
    fn store_id(&self) -> Value {
        match self.config.store_id.parse::<u64>() {
            Ok(n) => json!(n),
            Err(_) => json!(self.config.store_id),
        }
    }

    fn initiate_body(&self, reference: &str, amount: Decimal, payer: &str) -> Value {
        json!({
            "orderId": reference,
            "storeId": self.store_id(),
            "transactionAmount": two_places(amount),
            "transactionType": "MA",
            "mobileAccountNo": payer,
            "emailAddress": self.config.default_email,
        })
    }

    fn inquiry_body(&self, order_id: &str) -> Value {
        json!({
            "orderId": order_id,
            "storeId": self.store_id(),
            "accountNum": self.config.account_num,
        })
    }

    async fn call(&self, path: &str, body: &Value) -> Result<ProviderResponse, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Easypaisa request");

        let reply = post_json(
            &self.client,
            &url,
            &[("Credentials", self.credentials.as_str())],
            body,
        )
        .await?;

        parse_reply(reply)
    }
}

/// Amount with exactly two decimals, half away from zero
fn two_places(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Extract the uniform envelope from an Easypaisa reply
fn parse_reply(reply: HttpReply) -> Result<ProviderResponse, AdapterError> {
    let is_success = reply.is_success();
    let http_status = reply.status;
    let body = reply.body;
    let response_code = str_field(&body, "responseCode");
    let response_desc = str_field(&body, "responseDesc");

    if !is_success {
        return match response_code {
            Some(code) => Err(AdapterError::Provider {
                code,
                message: response_desc.unwrap_or_else(|| format!("HTTP {}", http_status)),
                raw: Some(body),
            }),
            None => Err(AdapterError::Network(format!(
                "HTTP {} from Easypaisa",
                http_status
            ))),
        };
    }

    let mut extra = serde_json::Map::new();
    for key in ["paymentToken", "paymentTokenExpiryDateTime"] {
        if let Some(v) = str_field(&body, key) {
            extra.insert(key.to_string(), Value::String(v));
        }
    }

    Ok(ProviderResponse {
        response_code,
        response_desc,
        transaction_status: str_field(&body, "transactionStatus"),
        provider_transaction_id: str_field(&body, "transactionId"),
        extra,
        raw: body,
    })
}

#[async_trait]
impl ProviderAdapter for EasypaisaAdapter {
    fn name(&self) -> &'static str {
        "Easypaisa"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Easypaisa
    }

    fn rules(&self) -> &'static StatusRules {
        &EASYPAISA_RULES
    }

    fn inquiry_key(&self, txn: &Transaction) -> Option<String> {
        Some(txn.reference.clone())
    }

    async fn initiate(
        &self,
        reference: &str,
        amount: Decimal,
        payer: &str,
        _provider_ref: Option<&str>,
    ) -> Result<ProviderResponse, AdapterError> {
        let body = self.initiate_body(reference, amount, payer);
        self.call(INITIATE_PATH, &body).await
    }

    async fn inquire(&self, key: &str) -> Result<ProviderResponse, AdapterError> {
        let body = self.inquiry_body(key);
        self.call(INQUIRE_PATH, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge::types::TransactionStatus;

    fn config() -> EasypaisaConfig {
        EasypaisaConfig {
            base_url: "https://easypay.example.com/".to_string(),
            username: "merchant".to_string(),
            password: "s3cret".to_string(),
            store_id: "12345".to_string(),
            account_num: Some("654321".to_string()),
            default_email: "noreply@example.com".to_string(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_credentials_header() {
        let adapter = EasypaisaAdapter::new(config()).unwrap();
        assert_eq!(adapter.credentials, "bWVyY2hhbnQ6czNjcmV0");
        assert_eq!(adapter.base_url, "https://easypay.example.com");
    }

    #[test]
    fn test_initiate_body_shape() {
        let adapter = EasypaisaAdapter::new(config()).unwrap();
        let body = adapter.initiate_body("ORD-1", Decimal::new(100, 0), "03001234567");

        assert_eq!(body["orderId"], "ORD-1");
        assert_eq!(body["storeId"], 12345);
        assert_eq!(body["transactionAmount"], "100.00");
        assert_eq!(body["transactionType"], "MA");
        assert_eq!(body["mobileAccountNo"], "03001234567");
        assert_eq!(body["emailAddress"], "noreply@example.com");
    }

    #[test]
    fn test_amount_rounds_to_two_places() {
        let adapter = EasypaisaAdapter::new(config()).unwrap();
        let body = adapter.initiate_body("ORD-1", Decimal::new(12345, 3), "03001234567");
        assert_eq!(body["transactionAmount"], "12.35");
    }

    #[test]
    fn test_inquiry_body_and_key() {
        let mut cfg = config();
        cfg.store_id = "STORE-A".to_string();
        let adapter = EasypaisaAdapter::new(cfg).unwrap();
        let body = adapter.inquiry_body("ORD-9");

        assert_eq!(body["orderId"], "ORD-9");
        assert_eq!(body["storeId"], "STORE-A");
        assert_eq!(body["accountNum"], "654321");
    }

    #[test]
    fn test_parse_paid_reply() {
        let reply = HttpReply {
            status: 200,
            body: json!({
                "responseCode": "0000",
                "responseDesc": "SUCCESS",
                "transactionStatus": "PAID",
                "transactionId": 987654,
                "paymentToken": "PT-1"
            }),
        };

        let resp = parse_reply(reply).unwrap();
        assert_eq!(resp.provider_transaction_id.as_deref(), Some("987654"));
        assert_eq!(resp.extra["paymentToken"], "PT-1");
        assert_eq!(resp.normalize(&EASYPAISA_RULES).status, TransactionStatus::Success);
    }

    #[test]
    fn test_parse_rejected_code_is_envelope_not_error() {
        let reply = HttpReply {
            status: 200,
            body: json!({ "responseCode": "0013", "responseDesc": "Invalid account" }),
        };

        let n = parse_reply(reply).unwrap().normalize(&EASYPAISA_RULES);
        assert_eq!(n.status, TransactionStatus::Failed);
        assert_eq!(n.error_code.as_deref(), Some("EASYPAY_0013"));
    }

    #[test]
    fn test_parse_non_2xx_reply() {
        let structured = HttpReply {
            status: 401,
            body: json!({ "responseCode": "0008", "responseDesc": "Unauthorized" }),
        };
        assert!(matches!(
            parse_reply(structured),
            Err(AdapterError::Provider { ref code, .. }) if code == "0008"
        ));

        let bare = HttpReply {
            status: 503,
            body: json!({ "error": "upstream" }),
        };
        assert!(matches!(parse_reply(bare), Err(AdapterError::Network(_))));
    }
}
