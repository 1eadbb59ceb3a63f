//! Wallet Reconciler - mobile-wallet charge service
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────┐    ┌───────────┐
//! │ Gateway  │───▶│ Orchestrator │───▶│ Adapters │───▶│ Providers │
//! │ (axum)   │    │ (idempotent) │    │          │    │           │
//! └──────────┘    └──────┬───────┘    └────▲─────┘    └───────────┘
//!                        │                 │
//!                        ▼                 │ inquire
//!                 ┌──────────────┐   ┌─────┴──────┐
//!                 │    Store     │◀──│ Scheduler  │
//!                 │ (PG/memory)  │   │ (backoff)  │
//!                 └──────────────┘   └────────────┘
//! ```
//!
//! Usage: `wallet_reconciler [--env <name>]` reads `config/<name>.yaml`.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use wallet_reconciler::charge::{
    ChargeOrchestrator, EasypaisaAdapter, JazzCashAdapter, MemoryStore, MockProvider,
    PgTransactionStore, ReconciliationScheduler, SchedulerSettings, TransactionStore,
};
use wallet_reconciler::config::AppConfig;
use wallet_reconciler::db::{Database, schema};
use wallet_reconciler::gateway::{self, ApiKeyStore, PgApiKeyStore, StaticApiKeyStore, state::AppState};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Register an adapter for every configured provider
fn build_orchestrator(
    config: &AppConfig,
    store: Arc<dyn TransactionStore>,
) -> anyhow::Result<ChargeOrchestrator> {
    let mut orchestrator = ChargeOrchestrator::new(store, config.charge.network_error_policy);

    if let Some(ep) = &config.providers.easypaisa {
        let adapter = EasypaisaAdapter::new(ep.clone()).context("Easypaisa adapter")?;
        orchestrator = orchestrator.with_adapter(Arc::new(adapter));
        tracing::info!("Easypaisa adapter registered");
    }
    if let Some(jc) = &config.providers.jazzcash {
        let adapter = JazzCashAdapter::new(jc.clone()).context("JazzCash adapter")?;
        orchestrator = orchestrator.with_adapter(Arc::new(adapter));
        tracing::info!("JazzCash adapter registered");
    }
    if config.providers.mock.as_ref().is_some_and(|m| m.enabled) {
        orchestrator = orchestrator.with_adapter(Arc::new(MockProvider::new()));
        tracing::warn!("Mock provider enabled, charges will not reach a real wallet");
    }

    if orchestrator.providers().is_empty() {
        tracing::warn!("No providers configured, every charge will be rejected");
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env);
    let _log_guard = wallet_reconciler::logging::init_logging(&app_config);

    tracing::info!("Starting Wallet Reconciler in {} mode", env);

    let db = match &app_config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            schema::init_schema(db.pool())
                .await
                .context("Failed to initialize schema")?;
            Some(Arc::new(db))
        }
        None => {
            tracing::warn!("postgres_url not set, running without persistence (in-memory store)");
            None
        }
    };

    let (store, api_keys): (Arc<dyn TransactionStore>, Arc<dyn ApiKeyStore>) = match &db {
        Some(db) => (
            Arc::new(PgTransactionStore::new(db.pool().clone())),
            Arc::new(PgApiKeyStore::new(db.pool().clone())),
        ),
        None => {
            let keys = match &app_config.dev_api_key {
                Some(key) => StaticApiKeyStore::dev(key.clone()),
                None => {
                    tracing::warn!("dev_api_key not set, all merchant requests will be rejected");
                    StaticApiKeyStore::new()
                }
            };
            (Arc::new(MemoryStore::new()), Arc::new(keys))
        }
    };

    let orchestrator = Arc::new(build_orchestrator(&app_config, store)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = if app_config.scheduler.enabled {
        let scheduler = ReconciliationScheduler::new(
            orchestrator.clone(),
            SchedulerSettings::from(&app_config.scheduler),
        );
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    } else {
        tracing::warn!("Reconciliation scheduler disabled, PENDING charges will not be resolved");
        None
    };

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let state = Arc::new(AppState::new(orchestrator, api_keys, db));
    gateway::run_server(&app_config.gateway, state, shutdown_rx)
        .await
        .context("Gateway server failed")?;

    if let Some(handle) = scheduler_handle
        && let Err(e) = handle.await
    {
        tracing::error!("Scheduler task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
