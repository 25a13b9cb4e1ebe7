//! Backing stores for ledger tables
//!
//! A store executes each ledger statement as one atomic unit against its
//! backing relation. It never splits a check from its write: `upsert_add` and
//! `guarded_take` are single statements, so concurrent callers on the same key
//! cannot race each other into a lost update or a negative balance.
//!
//! - [`PgStore`] - Postgres via a sqlx connection pool
//! - [`MemoryStore`] - in-process store with the same per-statement atomicity

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::value::LedgerValue;
use async_trait::async_trait;
use uuid::Uuid;

/// Statement protocol a ledger table runs against its store
///
/// Each call acquires whatever connection it needs for its own duration and
/// releases it on every exit path.
#[async_trait]
pub trait LedgerStore<V: LedgerValue>: Send + Sync + 'static {
    /// Create the table if it does not exist yet
    async fn create_table(&self, table: &str) -> Result<()>;

    /// Read the value stored for `key`
    async fn fetch(&self, table: &str, key: Uuid) -> Result<Option<V>>;

    /// Insert `amount`, or overwrite the existing value
    async fn upsert_set(&self, table: &str, key: Uuid, amount: V) -> Result<()>;

    /// Insert `amount`, or add it to the existing value
    async fn upsert_add(&self, table: &str, key: Uuid, amount: V) -> Result<()>;

    /// Subtract `amount` only if the stored value covers it
    ///
    /// Returns whether a row was updated. Absent keys are never created.
    async fn guarded_take(&self, table: &str, key: Uuid, amount: V) -> Result<bool>;

    /// Sum of all stored values, zero for an empty table
    async fn sum(&self, table: &str) -> Result<V>;
}
