//! Postgres store
//!
//! Table layout:
//!
//! ```text
//! "key"   VARCHAR(36)  hyphenated UUID, primary key
//! "value" <COLUMN_TYPE> NOT NULL, CHECK ("value" >= 0)
//! ```
//!
//! The check constraint backs up the guarded statements: even a buggy caller
//! cannot commit a negative balance.

use super::LedgerStore;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::value::LedgerValue;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// SQLSTATEs raised when two sessions race `CREATE TABLE IF NOT EXISTS`
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATE raised when a value exceeds the column's precision
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Postgres-backed ledger store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Scoped connection, returned to the pool on drop
    async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to acquire connection: {}", e)))
    }
}

fn is_concurrent_create(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == DUPLICATE_TABLE || code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

/// An out-of-range result is an overflow, not an outage
fn statement_error(err: sqlx::Error) -> Error {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    classify(code.as_deref(), err.to_string())
}

fn classify(code: Option<&str>, message: String) -> Error {
    match code {
        Some(NUMERIC_VALUE_OUT_OF_RANGE) => Error::Overflow(message),
        _ => Error::StoreUnavailable(message),
    }
}

#[async_trait]
impl<V: LedgerValue> LedgerStore<V> for PgStore {
    async fn create_table(&self, table: &str) -> Result<()> {
        let mut conn = self
            .acquire()
            .await
            .map_err(|e| Error::SchemaInitialization(e.to_string()))?;

        let sql = statements::create_table(table, V::COLUMN_TYPE);
        match sqlx::query(&sql).execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(e) if is_concurrent_create(&e) => {
                warn!(table, "Table created concurrently by another session");
                Ok(())
            }
            Err(e) => Err(Error::SchemaInitialization(e.to_string())),
        }
    }

    async fn fetch(&self, table: &str, key: Uuid) -> Result<Option<V>> {
        let mut conn = self.acquire().await?;

        let value = sqlx::query_scalar::<_, V>(&statements::select_value(table))
            .bind(key.to_string())
            .fetch_optional(&mut *conn)
            .await
            .map_err(statement_error)?;

        Ok(value)
    }

    async fn upsert_set(&self, table: &str, key: Uuid, amount: V) -> Result<()> {
        let mut conn = self.acquire().await?;

        sqlx::query(&statements::upsert_set(table))
            .bind(key.to_string())
            .bind(amount)
            .execute(&mut *conn)
            .await
            .map_err(statement_error)?;

        debug!(table, %key, %amount, "Value set");
        Ok(())
    }

    async fn upsert_add(&self, table: &str, key: Uuid, amount: V) -> Result<()> {
        let mut conn = self.acquire().await?;

        sqlx::query(&statements::upsert_add(table))
            .bind(key.to_string())
            .bind(amount)
            .execute(&mut *conn)
            .await
            .map_err(statement_error)?;

        debug!(table, %key, %amount, "Value added");
        Ok(())
    }

    async fn guarded_take(&self, table: &str, key: Uuid, amount: V) -> Result<bool> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(&statements::guarded_take(table))
            .bind(amount)
            .bind(key.to_string())
            .execute(&mut *conn)
            .await
            .map_err(statement_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn sum(&self, table: &str) -> Result<V> {
        let mut conn = self.acquire().await?;

        let total = sqlx::query_scalar::<_, V>(&statements::select_total(table, V::COLUMN_TYPE))
            .fetch_one(&mut *conn)
            .await
            .map_err(statement_error)?;

        Ok(total)
    }
}

/// Statement text. `table` must already be a validated identifier.
pub(crate) mod statements {
    pub fn create_table(table: &str, column_type: &str) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                "key" VARCHAR(36) NOT NULL,
                "value" {column_type} NOT NULL CHECK ("value" >= 0),
                PRIMARY KEY ("key")
            )"#
        )
    }

    pub fn select_value(table: &str) -> String {
        format!(r#"SELECT "value" FROM "{table}" WHERE "key" = $1"#)
    }

    pub fn upsert_set(table: &str) -> String {
        format!(
            r#"INSERT INTO "{table}" ("key", "value") VALUES ($1, $2)
            ON CONFLICT ("key") DO UPDATE SET "value" = EXCLUDED."value""#
        )
    }

    pub fn upsert_add(table: &str) -> String {
        format!(
            r#"INSERT INTO "{table}" ("key", "value") VALUES ($1, $2)
            ON CONFLICT ("key") DO UPDATE SET "value" = "{table}"."value" + EXCLUDED."value""#
        )
    }

    pub fn guarded_take(table: &str) -> String {
        format!(
            r#"UPDATE "{table}" SET "value" = "value" - $1
            WHERE "key" = $2 AND "value" >= $1"#
        )
    }

    pub fn select_total(table: &str, column_type: &str) -> String {
        format!(
            r#"SELECT CAST(COALESCE(SUM("value"), 0) AS {column_type}) AS total FROM "{table}""#
        )
    }
}
