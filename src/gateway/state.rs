use std::sync::Arc;

use crate::charge::ChargeOrchestrator;
use crate::db::Database;

use super::auth::ApiKeyStore;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChargeOrchestrator>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    /// PostgreSQL handle for health reporting; `None` in memory mode
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<ChargeOrchestrator>,
        api_keys: Arc<dyn ApiKeyStore>,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            orchestrator,
            api_keys,
            db,
        }
    }
}
