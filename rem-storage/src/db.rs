//! Database client wrapper
//!
//! Wraps the deadpool connection pool with error normalization and bounded
//! retries for connection-level faults. Query-level failures are never
//! retried here: a statement that failed once against a healthy connection
//! will fail again.

use std::time::Duration;

use deadpool_postgres::{Object, Pool};
use rem_core::{RemError, RemResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::DbConfig;

/// Connection-fault retry budget.
const CONNECT_RETRIES: u32 = 3;
const CONNECT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Database client holding the connection pool.
#[derive(Clone)]
pub struct Db {
    pool: Pool,
}

impl Db {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> RemResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection, retrying pool-level faults with backoff.
    pub async fn get_conn(&self) -> RemResult<Object> {
        let mut attempt = 0u32;
        loop {
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < CONNECT_RETRIES => {
                    attempt += 1;
                    let delay = CONNECT_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(attempt, error = %e, "connection acquisition failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(RemError::query_execution(format!(
                        "connection pool exhausted: {e}"
                    )))
                }
            }
        }
    }

    /// Run a statement through the per-connection prepared-statement
    /// cache, returning the affected row count.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RemResult<u64> {
        let conn = self.get_conn().await?;
        let statement = conn.prepare_cached(sql).await.map_err(normalize_pg_error)?;
        conn.execute(&statement, params)
            .await
            .map_err(normalize_pg_error)
    }

    /// Run a query, returning all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> RemResult<Vec<Row>> {
        let conn = self.get_conn().await?;
        let statement = conn.prepare_cached(sql).await.map_err(normalize_pg_error)?;
        conn.query(&statement, params)
            .await
            .map_err(normalize_pg_error)
    }

    /// Run a query expected to return at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> RemResult<Option<Row>> {
        let conn = self.get_conn().await?;
        let statement = conn.prepare_cached(sql).await.map_err(normalize_pg_error)?;
        conn.query_opt(&statement, params)
            .await
            .map_err(normalize_pg_error)
    }

    /// Apply a multi-statement SQL script (migrations, generated schema).
    pub async fn batch_execute(&self, sql: &str) -> RemResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(sql).await.map_err(normalize_pg_error)
    }
}

/// Normalize a tokio-postgres error into the REM taxonomy.
pub fn normalize_pg_error(err: tokio_postgres::Error) -> RemError {
    if let Some(db_err) = err.as_db_error() {
        if db_err.code() == &SqlState::UNIQUE_VIOLATION {
            // The conflicting natural key ends up in the error detail
            // ("Key (tenant_id, name)=(acme, x) already exists").
            let key = db_err
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| db_err.constraint().unwrap_or("unknown").to_string());
            return RemError::Conflict { key };
        }
        return RemError::query_execution(format!(
            "{} ({})",
            db_err.message(),
            db_err.code().code()
        ));
    }
    RemError::query_execution(err.to_string())
}
