//! In-process store
//!
//! Every statement runs inside one critical section, which gives it the same
//! atomicity a single SQL statement has. Clones share state, so several
//! ledger tables built from clones behave like several processes pointed at
//! one database.

use super::LedgerStore;
use crate::error::{Error, Result};
use crate::value::LedgerValue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type Tables<V> = HashMap<String, HashMap<Uuid, V>>;

/// In-memory ledger store for tests and local development
pub struct MemoryStore<V> {
    tables: Arc<Mutex<Tables<V>>>,
    statements: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            statements: Arc::clone(&self.statements),
            available: Arc::clone(&self.available),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MemoryStore<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            statements: Arc::new(AtomicU64::new(0)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of statements executed so far, across all clones
    pub fn statements_executed(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    /// Simulate an outage: while unavailable every statement fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// True once `create_table` has run for `table`
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }

    /// Number of rows in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(HashMap::len).unwrap_or(0)
    }

    /// Run one statement under the store lock
    fn execute<T>(
        &self,
        table: &str,
        statement: impl FnOnce(&mut HashMap<Uuid, V>) -> Result<T>,
    ) -> Result<T> {
        self.begin()?;
        let mut tables = self.tables.lock();
        let rows = tables.get_mut(table).ok_or_else(|| {
            Error::StoreUnavailable(format!("relation \"{}\" does not exist", table))
        })?;
        statement(rows)
    }

    fn begin(&self) -> Result<()> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

fn overflow<V: LedgerValue>(key: Uuid, lhs: V, op: char, rhs: V) -> Error {
    Error::Overflow(format!("{} {} {} overflows for key {}", lhs, op, rhs, key))
}

#[async_trait]
impl<V: LedgerValue> LedgerStore<V> for MemoryStore<V> {
    async fn create_table(&self, table: &str) -> Result<()> {
        self.begin()
            .map_err(|e| Error::SchemaInitialization(e.to_string()))?;
        self.tables.lock().entry(table.to_string()).or_default();
        Ok(())
    }

    async fn fetch(&self, table: &str, key: Uuid) -> Result<Option<V>> {
        self.execute(table, |rows| Ok(rows.get(&key).copied()))
    }

    async fn upsert_set(&self, table: &str, key: Uuid, amount: V) -> Result<()> {
        self.execute(table, |rows| {
            rows.insert(key, amount);
            Ok(())
        })?;
        debug!(table, %key, %amount, "Value set");
        Ok(())
    }

    async fn upsert_add(&self, table: &str, key: Uuid, amount: V) -> Result<()> {
        self.execute(table, |rows| {
            let current = rows.get(&key).copied().unwrap_or_else(V::zero);
            let updated = current
                .checked_add(amount)
                .filter(V::fits_column)
                .ok_or_else(|| overflow(key, current, '+', amount))?;
            rows.insert(key, updated);
            Ok(())
        })?;
        debug!(table, %key, %amount, "Value added");
        Ok(())
    }

    async fn guarded_take(&self, table: &str, key: Uuid, amount: V) -> Result<bool> {
        self.execute(table, |rows| match rows.get_mut(&key) {
            Some(current) if *current >= amount => {
                let before = *current;
                *current = before
                    .checked_sub(amount)
                    .ok_or_else(|| overflow(key, before, '-', amount))?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn sum(&self, table: &str) -> Result<V> {
        self.execute(table, |rows| {
            rows.values().try_fold(V::zero(), |acc, value| {
                acc.checked_add(*value)
                    .filter(V::fits_column)
                    .ok_or_else(|| Error::Overflow(format!("sum overflows at {}", acc)))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_statements_require_table() {
        let store = MemoryStore::<Decimal>::new();
        let err = store.fetch("balances", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        store.create_table("balances").await.unwrap();
        store.create_table("balances").await.unwrap();
        assert!(store.has_table("balances"));
        assert_eq!(store.fetch("balances", Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_guarded_take_never_goes_negative() {
        let store = MemoryStore::<Decimal>::new();
        store.create_table("balances").await.unwrap();
        let key = Uuid::new_v4();

        store.upsert_set("balances", key, dec!(10)).await.unwrap();
        assert!(!store.guarded_take("balances", key, dec!(10.01)).await.unwrap());
        assert!(store.guarded_take("balances", key, dec!(10)).await.unwrap());
        assert_eq!(store.fetch("balances", key).await.unwrap(), Some(dec!(0)));
    }

    #[tokio::test]
    async fn test_guarded_take_does_not_create_rows() {
        let store = MemoryStore::<i64>::new();
        store.create_table("counters").await.unwrap();

        assert!(!store.guarded_take("counters", Uuid::new_v4(), 1).await.unwrap());
        assert_eq!(store.row_count("counters"), 0);
    }

    #[tokio::test]
    async fn test_add_overflow_leaves_value_unchanged() {
        let store = MemoryStore::<i64>::new();
        store.create_table("counters").await.unwrap();
        let key = Uuid::new_v4();

        store.upsert_set("counters", key, i64::MAX).await.unwrap();
        let err = store.upsert_add("counters", key, 1).await.unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
        assert_eq!(store.fetch("counters", key).await.unwrap(), Some(i64::MAX));
    }

    #[tokio::test]
    async fn test_add_past_column_bound_overflows() {
        let store = MemoryStore::<Decimal>::new();
        store.create_table("balances").await.unwrap();
        let key = Uuid::new_v4();
        let near_bound = dec!(99999999999999999999.99999999);

        store.upsert_set("balances", key, near_bound).await.unwrap();
        let err = store
            .upsert_add("balances", key, dec!(0.00000001))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
        assert_eq!(store.fetch("balances", key).await.unwrap(), Some(near_bound));

        store.upsert_set("balances", Uuid::new_v4(), near_bound).await.unwrap();
        let err = store.sum("balances").await.unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::<i64>::new();
        let other = store.clone();
        store.create_table("counters").await.unwrap();

        let key = Uuid::new_v4();
        other.upsert_add("counters", key, 3).await.unwrap();
        store.upsert_add("counters", key, 4).await.unwrap();

        assert_eq!(store.sum("counters").await.unwrap(), 7);
        assert_eq!(other.statements_executed(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = MemoryStore::<i64>::new();
        store.create_table("counters").await.unwrap();
        store.set_available(false);

        let err = store.sum("counters").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        let err = store.create_table("other").await.unwrap_err();
        assert!(matches!(err, Error::SchemaInitialization(_)));
    }
}
