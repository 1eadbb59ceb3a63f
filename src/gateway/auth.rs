//! Merchant API-key authentication
//!
//! `X-Api-Key` is resolved to a [`Merchant`] by an [`ApiKeyStore`] and the
//! merchant is attached to the request extensions for handlers to read.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use rustc_hash::FxHashMap;
use sqlx::PgPool;

use super::state::AppState;
use super::types::ApiError;
use crate::db::SafeRow;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated merchant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub merchant_id: String,
    pub merchant_name: String,
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Resolve an active key, or `None` if it is unknown or disabled
    async fn resolve(&self, api_key: &str) -> Result<Option<Merchant>, sqlx::Error>;
}

/// `api_keys` table lookup; records `last_used_at` on every hit
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn resolve(&self, api_key: &str) -> Result<Option<Merchant>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE api_keys
            SET last_used_at = NOW()
            WHERE api_key = $1 AND is_active = TRUE
            RETURNING merchant_id, merchant_name
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            Some(Merchant {
                merchant_id: row.try_get_log("merchant_id")?,
                merchant_name: row.try_get_log("merchant_name")?,
            })
        }))
    }
}

/// Fixed key table for running without PostgreSQL
#[derive(Default)]
pub struct StaticApiKeyStore {
    keys: FxHashMap<String, Merchant>,
}

impl StaticApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single development key mapped to `dev-merchant`
    pub fn dev(api_key: impl Into<String>) -> Self {
        Self::new().with_key(
            api_key,
            Merchant {
                merchant_id: "dev-merchant".to_string(),
                merchant_name: "Development Merchant".to_string(),
            },
        )
    }

    pub fn with_key(mut self, api_key: impl Into<String>, merchant: Merchant) -> Self {
        self.keys.insert(api_key.into(), merchant);
        self
    }
}

#[async_trait]
impl ApiKeyStore for StaticApiKeyStore {
    async fn resolve(&self, api_key: &str) -> Result<Option<Merchant>, sqlx::Error> {
        Ok(self.keys.get(api_key).cloned())
    }
}

/// Resolve the merchant behind the request's `X-Api-Key` header
pub async fn authenticate(
    keys: &Arc<dyn ApiKeyStore>,
    headers: &HeaderMap,
) -> Result<Merchant, ApiError> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing X-Api-Key header"))?;

    match keys.resolve(api_key).await {
        Ok(Some(merchant)) => Ok(merchant),
        Ok(None) => Err(ApiError::unauthorized("Invalid or inactive API key")),
        Err(e) => {
            tracing::error!("API key lookup failed: {}", e);
            Err(ApiError::internal("Internal server error"))
        }
    }
}

/// Axum middleware for merchant API-key authentication
pub async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let merchant = authenticate(&state.api_keys, request.headers()).await?;
    tracing::debug!(merchant_id = %merchant.merchant_id, "Request authenticated");

    request.extensions_mut().insert(merchant);
    Ok(next.run(request).await)
}
