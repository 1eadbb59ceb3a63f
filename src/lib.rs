//! Wallet Reconciler
//!
//! Idempotent mobile-wallet charges with background status reconciliation.
//!
//! # Modules
//!
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`charge`] - orchestrator, provider adapters, store and scheduler
//! - [`gateway`] - axum HTTP surface

pub mod charge;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;

pub use charge::{
    ChargeError, ChargeOrchestrator, ChargeRequest, ChargeResult, ReconciliationScheduler,
    Transaction, TransactionStatus, TransactionStore,
};
pub use config::AppConfig;
