//! Provider status normalization
//!
//! Maps a provider's `(response code, transaction status)` pair onto the three
//! canonical states. The decision is tiered and total:
//!
//! ```text
//! code not accepted        -> FAILED  (errorCode = prefix + code)
//! status in success set    -> SUCCESS
//! status in failure set    -> FAILED  (errorCode = prefix + code)
//! anything else            -> PENDING
//! ```
//!
//! An unrecognized status is never an error. It stays PENDING and the
//! scheduler decides later.

use serde::Serialize;

use super::types::TransactionStatus;

/// HTTP status the caller-facing layer should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HttpIntent {
    /// 200
    Ok,
    /// 202
    Accepted,
    /// 400
    Rejected,
}

impl HttpIntent {
    pub fn for_status(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Success => HttpIntent::Ok,
            TransactionStatus::Pending => HttpIntent::Accepted,
            TransactionStatus::Failed => HttpIntent::Rejected,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            HttpIntent::Ok => 200,
            HttpIntent::Accepted => 202,
            HttpIntent::Rejected => 400,
        }
    }
}

/// Provider-specific constants consumed by [`normalize`]
///
/// Status sets are matched after trimming and upper-casing the provider value.
#[derive(Debug, Clone, Copy)]
pub struct StatusRules {
    pub error_prefix: &'static str,
    pub accepted_codes: &'static [&'static str],
    pub success_statuses: &'static [&'static str],
    pub failure_statuses: &'static [&'static str],
}

impl StatusRules {
    fn is_accepted(&self, code: &str) -> bool {
        self.accepted_codes.contains(&code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedStatus {
    pub status: TransactionStatus,
    pub success: bool,
    pub http_intent: HttpIntent,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl NormalizedStatus {
    fn success() -> Self {
        Self {
            status: TransactionStatus::Success,
            success: true,
            http_intent: HttpIntent::Ok,
            error_code: None,
            error_message: None,
        }
    }

    fn pending() -> Self {
        Self {
            status: TransactionStatus::Pending,
            success: true,
            http_intent: HttpIntent::Accepted,
            error_code: None,
            error_message: None,
        }
    }

    fn failed(code: String, message: String) -> Self {
        Self {
            status: TransactionStatus::Failed,
            success: false,
            http_intent: HttpIntent::Rejected,
            error_code: Some(code),
            error_message: Some(message),
        }
    }
}

/// Map a provider response onto a canonical status
///
/// `desc` only feeds the error message; it never influences the decision.
pub fn normalize(
    rules: &StatusRules,
    status: Option<&str>,
    code: Option<&str>,
    desc: Option<&str>,
) -> NormalizedStatus {
    let code = code.map(str::trim).unwrap_or_default();

    if !rules.is_accepted(code) {
        let label = if code.is_empty() { "UNKNOWN" } else { code };
        return NormalizedStatus::failed(
            format!("{}{}", rules.error_prefix, label),
            desc.unwrap_or("Provider rejected the transaction").to_string(),
        );
    }

    let status = status.map(|s| s.trim().to_ascii_uppercase()).unwrap_or_default();

    if rules.success_statuses.contains(&status.as_str()) {
        return NormalizedStatus::success();
    }

    if rules.failure_statuses.contains(&status.as_str()) {
        return NormalizedStatus::failed(
            format!("{}{}", rules.error_prefix, code),
            desc.map(str::to_string)
                .unwrap_or_else(|| format!("Transaction {}", status.to_ascii_lowercase())),
        );
    }

    NormalizedStatus::pending()
}
