//! Charge Error Types

use thiserror::Error;

/// Errors surfaced by a provider adapter
///
/// `Network` and `Parse` mean the outcome at the provider is unknown.
/// `Provider` means the provider answered and rejected the request.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Provider unreachable: {0}")]
    Network(String),

    #[error("Provider rejected request [{code}]: {message}")]
    Provider {
        code: String,
        message: String,
        raw: Option<serde_json::Value>,
    },

    #[error("Malformed provider response: {0}")]
    Parse(String),
}

/// Charge error types
///
/// Error codes are what the merchant sees in `errorCode`.
#[derive(Error, Debug)]
pub enum ChargeError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported payment method: {0}")]
    UnsupportedProvider(String),

    #[error("Provider network error: {0}")]
    Network(String),

    #[error("Duplicate transaction for reference {0}")]
    DuplicateKey(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Internal system error: {0}")]
    System(String),
}

impl ChargeError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ChargeError::Validation(_) => "VALIDATION_ERROR",
            ChargeError::UnsupportedProvider(_) => "UNSUPPORTED_PAYMENT_METHOD",
            ChargeError::Network(_) => "NETWORK_ERROR",
            ChargeError::DuplicateKey(_) => "DUPLICATE_REFERENCE",
            ChargeError::Store(_) => "DATABASE_ERROR",
            ChargeError::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            ChargeError::Validation(_) | ChargeError::UnsupportedProvider(_) => 400,
            ChargeError::DuplicateKey(_) => 409,
            ChargeError::Network(_) => 504,
            ChargeError::Store(_) | ChargeError::System(_) => 500,
        }
    }
}

impl From<validator::ValidationErrors> for ChargeError {
    fn from(e: validator::ValidationErrors) -> Self {
        ChargeError::Validation(e.to_string())
    }
}
