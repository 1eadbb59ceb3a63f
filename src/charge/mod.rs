//! Mobile Wallet Charges
//!
//! Idempotent charge creation against external wallet providers, plus the
//! background reconciliation that settles charges the provider left PENDING.
//!
//! # Lifecycle
//!
//! ```text
//! charge ──► initiate ──► normalize ──► SUCCESS | FAILED    (terminal)
//!                                  └──► PENDING ──► scheduler inquiry ──► SUCCESS | FAILED
//!                                                        │
//!                                                        └── budget exhausted ──► FAILED
//! ```
//!
//! # Invariants
//!
//! 1. **One row per key**: at most one transaction per `(reference, merchant_id)`;
//!    a duplicate request replays the stored row and never reaches the provider
//! 2. **Monotonic status**: SUCCESS and FAILED are never left
//! 3. **Bounded retries**: a PENDING row gets at most one inquiry per schedule
//!    interval and is failed once the schedule is exhausted
//! 4. **Unknown means pending**: an unrecognized provider status is PENDING, never FAILED

pub mod adapters;
pub mod db;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod types;

pub use adapters::{EasypaisaAdapter, JazzCashAdapter, MockProvider, ProviderAdapter, ProviderResponse};
pub use db::PgTransactionStore;
pub use error::{AdapterError, ChargeError};
pub use normalizer::{HttpIntent, NormalizedStatus, StatusRules, normalize};
pub use orchestrator::ChargeOrchestrator;
pub use scheduler::{ReconciliationScheduler, RetrySchedule, SchedulerSettings, TickReport};
pub use store::{MemoryStore, TransactionStore};
pub use types::{
    ChargeRequest, ChargeResult, NetworkErrorPolicy, ProviderKind, ProviderMeta, StatusUpdate,
    Transaction, TransactionId, TransactionStatus, TxnKey,
};
