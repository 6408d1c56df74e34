use crate::error::Result;
use common::ErrorRecord;
use sqlx::types::Json;

/// Query operations on the error table
pub struct Queries;

impl Queries {
    /// Append one error record
    pub async fn insert_error(
        pool: impl sqlx::Executor<'_, Database = sqlx::Postgres>,
        table: &str,
        record: &ErrorRecord,
    ) -> Result<()> {
        sqlx::query(&format!(
            r#"INSERT INTO {table} (client_id, doc_id, error, "timestamp") VALUES ($1, $2, $3, $4)"#
        ))
        .bind(&record.client_id)
        .bind(&record.doc_id)
        .bind(Json(record.error.clone()))
        .bind(&record.timestamp)
        .execute(pool)
        .await?;
        Ok(())
    }
}
