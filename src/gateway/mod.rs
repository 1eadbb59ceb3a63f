//! HTTP Gateway
//!
//! ```text
//! GET  /health                              (public)
//! POST /api/v1/charge                       (X-Api-Key)
//! GET  /api/v1/transactions/{reference}     (X-Api-Key)
//! ```

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::GatewayConfig;
use state::AppState;

pub use auth::{ApiKeyStore, Merchant, PgApiKeyStore, StaticApiKeyStore};

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    let merchant_routes = Router::new()
        .route("/charge", post(handlers::create_charge))
        .route("/transactions/{reference}", get(handlers::get_transaction))
        .layer(from_fn_with_state(state.clone(), auth::api_key_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", merchant_routes)
        .with_state(state)
}

/// Start HTTP Gateway server
///
/// Returns once `shutdown` flips to `true` and in-flight requests finish.
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(
        "🚀 Gateway listening on http://{} (providers: {:?})",
        addr,
        state.orchestrator.providers()
    );
    println!("🚀 Gateway listening on http://{}", addr);
    println!("📍 Endpoints:");
    println!("   GET  /health");
    println!("   POST /api/v1/charge");
    println!("   GET  /api/v1/transactions/{{reference}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tracing::info!("Gateway shutting down");
        })
        .await
}
