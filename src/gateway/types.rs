//! Gateway request/response types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::charge::{ChargeError, TransactionStatus};

/// `POST /api/v1/charge` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeBody {
    pub reference: String,
    pub amount: Decimal,
    pub mobile: String,
    pub payment_method: String,
}

/// `GET /health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub providers: Vec<String>,
    pub timestamp: String,
}

/// Error body, shaped like a FAILED charge result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    pub error_code: String,
    pub error_message: String,
}

/// Gateway error, rendered as `(status, ErrorBody)`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                success: false,
                status: None,
                reference: None,
                payment_method: None,
                error_code: code.into(),
                error_message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "SYSTEM_ERROR", message)
    }

    /// A charge that ended in an error, echoing the request identifiers
    pub fn charge_failed(err: &ChargeError, reference: &str, payment_method: &str) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match err {
            // Do not leak driver details to merchants
            ChargeError::Store(_) | ChargeError::System(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut api = Self::new(status, err.code(), message);
        api.body.status = Some(TransactionStatus::Failed);
        api.body.reference = Some(reference.to_string());
        api.body.payment_method = Some(payment_method.to_string());
        api
    }
}

impl From<ChargeError> for ApiError {
    fn from(err: ChargeError) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            ChargeError::Store(_) | ChargeError::System(_) => {
                Self::new(status, err.code(), "Internal server error")
            }
            other => Self::new(status, other.code(), other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_body_accepts_number_and_string_amounts() {
        let body: ChargeBody = serde_json::from_str(
            r#"{"reference":"ORD-1","amount":100.5,"mobile":"03001234567","paymentMethod":"Easypaisa"}"#,
        )
        .unwrap();
        assert_eq!(body.amount, Decimal::new(1005, 1));
        assert_eq!(body.payment_method, "Easypaisa");

        let body: ChargeBody = serde_json::from_str(
            r#"{"reference":"ORD-1","amount":"100.00","mobile":"03001234567","paymentMethod":"jazzcash"}"#,
        )
        .unwrap();
        assert_eq!(body.amount, Decimal::new(10000, 2));
    }

    #[test]
    fn test_charge_failed_body_shape() {
        let err = ChargeError::Network("timed out".into());
        let api = ApiError::charge_failed(&err, "ORD-1", "jazzcash");
        assert_eq!(api.status, StatusCode::GATEWAY_TIMEOUT);

        let json = serde_json::to_value(&api.body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["reference"], "ORD-1");
        assert_eq!(json["paymentMethod"], "jazzcash");
        assert_eq!(json["errorCode"], "NETWORK_ERROR");
    }

    #[test]
    fn test_store_errors_are_not_leaked() {
        let api: ApiError = ChargeError::Store(sqlx::Error::PoolTimedOut).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.error_code, "DATABASE_ERROR");
        assert_eq!(api.body.error_message, "Internal server error");
    }
}
