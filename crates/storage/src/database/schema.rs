use crate::error::Result;
use sqlx::PgPool;
use tracing::info;

/// Database schema manager
pub struct Schema;

impl Schema {
    /// Create the error table and its index if missing
    pub async fn initialize(pool: &PgPool, table: &str) -> Result<()> {
        Self::create_errors_table(pool, table).await?;
        Self::create_indexes(pool, table).await?;
        info!("PostgreSQL error table {} initialized", table);
        Ok(())
    }

    /// Create the error table
    async fn create_errors_table(pool: &PgPool, table: &str) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                client_id VARCHAR(255) NOT NULL,
                doc_id VARCHAR(255) NOT NULL,
                error JSONB NOT NULL,
                "timestamp" TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Create indexes for per-document lookups
    async fn create_indexes(pool: &PgPool, table: &str) -> Result<()> {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_doc ON {table}(client_id, doc_id)"
        ))
        .execute(pool)
        .await?;
        Ok(())
    }
}
