//! Database access seam.
//!
//! The reconciler only needs two things from PostgreSQL: run a catalog query
//! with text parameters and read back text columns, and execute a statement.
//! `PgDatabase` implements that over a shared `sqlx::PgPool`; the pool is
//! built once by the daemon and injected, never held in a global.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row as _};
use tracing::debug;

use pgsource_core::config::DatabaseConfig;

use crate::error::{SchemaError, SchemaResult};

/// One result row, every column decoded as text.
pub type Row = Vec<String>;

#[async_trait]
pub trait Database: Send + Sync {
    /// Run a query with positional text parameters (`$1`, `$2`, ...).
    async fn query(&self, sql: &str, params: &[&str]) -> SchemaResult<Vec<Row>>;

    /// Execute a statement that returns no rows.
    async fn execute(&self, sql: &str) -> SchemaResult<()>;
}

/// `Database` over a pooled PostgreSQL connection.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDatabase {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Build a lazily-connecting pool from config.
    ///
    /// No connection is opened here; an unreachable server surfaces as a
    /// transient error on the first reconcile instead of failing startup.
    pub fn connect_lazy(url: &str, config: &DatabaseConfig) -> SchemaResult<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| SchemaError::Unavailable(format!("invalid database url: {e}")))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy_with(options);
        Ok(Self::new(pool, config.statement_timeout()))
    }

    async fn bounded<T, F>(&self, fut: F) -> SchemaResult<T>
    where
        F: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result.map_err(SchemaError::from),
            Err(_) => Err(SchemaError::Unavailable(format!(
                "statement timed out after {:?}",
                self.statement_timeout
            ))),
        }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn query(&self, sql: &str, params: &[&str]) -> SchemaResult<Vec<Row>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(param.to_string());
        }
        let rows = self.bounded(query.fetch_all(&self.pool)).await?;
        debug!(rows = rows.len(), "catalog query returned");

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<String, _>(i).map_err(SchemaError::from))
                    .collect::<SchemaResult<Row>>()
            })
            .collect()
    }

    async fn execute(&self, sql: &str) -> SchemaResult<()> {
        self.bounded(sqlx::query(sql).execute(&self.pool)).await?;
        Ok(())
    }
}
