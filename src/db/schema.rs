//! Schema bootstrap for the transaction store
//!
//! Statements are idempotent (`IF NOT EXISTS`) so the service can run them on
//! every start.

use sqlx::PgPool;

/// One row per `(reference, merchant_id)`. The unique constraint is what turns
/// a concurrent duplicate insert into `DuplicateKey`.
pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                       BIGSERIAL PRIMARY KEY,
    txn_id                   TEXT NOT NULL UNIQUE,
    reference                TEXT NOT NULL,
    merchant_id              TEXT NOT NULL,
    provider                 TEXT NOT NULL,
    channel                  TEXT NOT NULL,
    amount                   NUMERIC(18, 2) NOT NULL CHECK (amount > 0),
    currency                 TEXT NOT NULL DEFAULT 'PKR',
    mobile                   TEXT NOT NULL,
    status                   TEXT NOT NULL CHECK (status IN ('PENDING', 'SUCCESS', 'FAILED')),
    provider_transaction_id  TEXT,
    provider_response_code   TEXT,
    provider_response_desc   TEXT,
    provider_payload         JSONB,
    created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at             TIMESTAMPTZ,
    CONSTRAINT uq_transactions_reference_merchant UNIQUE (reference, merchant_id)
)
"#;

pub const CREATE_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_pending
    ON transactions (updated_at)
    WHERE status = 'PENDING'
"#;

pub const CREATE_PROVIDER_TXN_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transactions_provider_txn
    ON transactions (provider_transaction_id)
"#;

pub const CREATE_API_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    id             BIGSERIAL PRIMARY KEY,
    api_key        TEXT NOT NULL UNIQUE,
    merchant_id    TEXT NOT NULL,
    merchant_name  TEXT NOT NULL,
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_used_at   TIMESTAMPTZ
)
"#;

/// Create tables and indexes if they are missing
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing transaction store schema...");

    for statement in [
        CREATE_TRANSACTIONS_TABLE,
        CREATE_PENDING_INDEX,
        CREATE_PROVIDER_TXN_INDEX,
        CREATE_API_KEYS_TABLE,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("✅ Schema ready");
    Ok(())
}
