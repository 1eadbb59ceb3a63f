//! HTTP handlers
//!
//! Handlers are thin: they translate HTTP to [`ChargeOrchestrator`](crate::charge::ChargeOrchestrator)
//! calls and map the outcome back to a status code.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::auth::Merchant;
use super::state::AppState;
use super::types::{ApiError, ChargeBody, HealthResponse};
use crate::charge::{ChargeError, ChargeRequest, ChargeResult, ProviderKind};

type ChargeReply = (StatusCode, Json<ChargeResult>);

fn reply(result: ChargeResult) -> ChargeReply {
    let status =
        StatusCode::from_u16(result.http_intent.status_code()).unwrap_or(StatusCode::OK);
    (status, Json(result))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    if let Some(db) = &state.db
        && let Err(e) = db.health_check().await
    {
        tracing::warn!("Database health check failed: {}", e);
    }

    let providers = state
        .orchestrator
        .providers()
        .iter()
        .map(|p| p.to_string())
        .collect();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: "wallets-api",
            providers,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}

/// `POST /api/v1/charge`
///
/// 200 SUCCESS, 202 PENDING, 400 FAILED. A replayed reference answers with
/// the stored status and never reaches the provider.
pub async fn create_charge(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    payload: Result<Json<ChargeBody>, JsonRejection>,
) -> Result<ChargeReply, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let provider: ProviderKind = body.payment_method.parse().map_err(|_| {
        ApiError::charge_failed(
            &ChargeError::UnsupportedProvider(body.payment_method.clone()),
            &body.reference,
            &body.payment_method,
        )
    })?;

    tracing::info!(
        reference = %body.reference,
        merchant_id = %merchant.merchant_id,
        provider = %provider,
        amount = %body.amount,
        "Charge requested"
    );

    let request = ChargeRequest::new(
        merchant.merchant_id.clone(),
        body.reference.clone(),
        body.amount,
        body.mobile,
        provider,
    );

    match state.orchestrator.charge(request).await {
        Ok(result) => Ok(reply(result)),
        Err(e) => {
            match &e {
                ChargeError::Store(_) | ChargeError::System(_) => {
                    tracing::error!(reference = %body.reference, "Charge failed: {}", e)
                }
                _ => tracing::warn!(reference = %body.reference, "Charge failed: {}", e),
            }
            Err(ApiError::charge_failed(&e, &body.reference, provider.as_str()))
        }
    }
}

/// `GET /api/v1/transactions/{reference}`
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Extension(merchant): Extension<Merchant>,
    Path(reference): Path<String>,
) -> Result<ChargeReply, ApiError> {
    let result = state
        .orchestrator
        .get(&reference, &merchant.merchant_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Transaction {} not found", reference)))?;

    Ok((StatusCode::OK, Json(result)))
}
