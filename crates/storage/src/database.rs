//! PostgreSQL error table

pub mod queries;
pub mod schema;

use crate::error::{Result, StorageError};
use crate::ErrorLog;
use async_trait::async_trait;
use common::ErrorRecord;
use queries::Queries;
use schema::Schema;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 4;

/// Error records appended to a PostgreSQL table
pub struct PostgresErrorLog {
    connect_options: Option<PgConnectOptions>,
    pool: OnceCell<PgPool>,
    table: String,
    schema_ready: OnceCell<()>,
}

/// Table names are interpolated into SQL, so only plain identifiers are accepted
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || table.len() > 63 {
        return Err(StorageError::InvalidDescriptor(format!(
            "invalid error table name: {:?}",
            table
        )));
    }
    Ok(())
}

impl PostgresErrorLog {
    /// Parse the database url without connecting.
    /// The pool is created, and the table with it, on the first append.
    pub fn new(database_url: &str, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let connect_options = PgConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::InvalidDescriptor(format!("invalid database url: {}", e)))?;
        Ok(Self {
            connect_options: Some(connect_options),
            pool: OnceCell::new(),
            table: table.to_string(),
            schema_ready: OnceCell::new(),
        })
    }

    pub fn from_pool(pool: PgPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            connect_options: None,
            pool: OnceCell::new_with(Some(pool)),
            table: table.to_string(),
            schema_ready: OnceCell::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn connect(&self) -> Result<PgPool> {
        let options = self.connect_options.clone().ok_or_else(|| {
            StorageError::InvalidDescriptor("error log has no database url".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        info!("Connected to PostgreSQL for error table {}", self.table);
        Ok(pool)
    }
}

#[async_trait]
impl ErrorLog for PostgresErrorLog {
    async fn append(&self, record: &ErrorRecord) -> Result<()> {
        let pool = self.pool.get_or_try_init(|| self.connect()).await?;
        self.schema_ready
            .get_or_try_init(|| Schema::initialize(pool, &self.table))
            .await?;
        Queries::insert_error(pool, &self.table, record).await?;
        debug!(
            "Logged error for {}/{} to {}",
            record.client_id, record.doc_id, self.table
        );
        Ok(())
    }
}
