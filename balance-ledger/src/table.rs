//! Ledger table: one non-negative value per UUID key
//!
//! # Invariants
//!
//! - No stored value is ever negative
//! - `add` and `take` are single atomic statements, never read-then-write
//! - A declined `take` leaves the row (or its absence) untouched
//!
//! The table object is a stateless accessor. It holds the store handle, the
//! table name and whether the schema has been confirmed; values are never
//! cached in-process.

use crate::error::{Error, Result};
use crate::store::LedgerStore;
use crate::value::{validate_amount, LedgerValue};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

/// Postgres limits identifiers to 63 bytes
const MAX_TABLE_NAME_LEN: usize = 63;

/// A named ledger table on a backing store
pub struct LedgerTable<V, S> {
    store: Arc<S>,
    name: String,
    /// Set once the create-if-not-exists step has succeeded
    ready: OnceCell<()>,
    _value: PhantomData<fn() -> V>,
}

impl<V, S> LedgerTable<V, S>
where
    V: LedgerValue,
    S: LedgerStore<V>,
{
    /// Create an accessor for `name` on `store`
    ///
    /// Nothing touches the store until the first operation.
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_table_name(&name)?;

        Ok(Self {
            store,
            name,
            ready: OnceCell::new(),
            _value: PhantomData,
        })
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// True once the schema has been confirmed present
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Run the create-if-not-exists step at most once
    ///
    /// A failure leaves the table uninitialized so the next call retries.
    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.store.create_table(&self.name).await.map_err(|e| match e {
                    Error::SchemaInitialization(_) => e,
                    other => Error::SchemaInitialization(other.to_string()),
                })?;
                info!(table = %self.name, "Ledger table ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Stored value, or `None` if the key has no row
    pub async fn get(&self, key: Uuid) -> Result<Option<V>> {
        self.ensure_ready().await?;
        self.store.fetch(&self.name, key).await
    }

    /// Stored value, or zero if the key has no row
    pub async fn get_or_zero(&self, key: Uuid) -> Result<V> {
        Ok(self.get(key).await?.unwrap_or_else(V::zero))
    }

    /// Overwrite the value for `key`, creating the row if needed
    pub async fn set(&self, key: Uuid, amount: V) -> Result<()> {
        validate_amount(&amount)?;
        self.ensure_ready().await?;
        self.store.upsert_set(&self.name, key, amount).await
    }

    /// Add `amount` to the value for `key`, creating the row if needed
    pub async fn add(&self, key: Uuid, amount: V) -> Result<()> {
        validate_amount(&amount)?;
        if amount.is_zero() {
            return Ok(());
        }
        self.ensure_ready().await?;
        self.store.upsert_add(&self.name, key, amount).await
    }

    /// Subtract `amount` from `key` if the balance covers it
    ///
    /// Returns `false` without changing anything when the key is absent or
    /// its value is below `amount`.
    pub async fn take(&self, key: Uuid, amount: V) -> Result<bool> {
        validate_amount(&amount)?;
        if amount.is_zero() {
            return Ok(true);
        }
        self.ensure_ready().await?;

        let taken = self.store.guarded_take(&self.name, key, amount).await?;
        if !taken {
            debug!(table = %self.name, %key, %amount, "Take declined: insufficient balance");
        }
        Ok(taken)
    }

    /// Sum of all values in the table
    pub async fn total(&self) -> Result<V> {
        self.ensure_ready().await?;
        self.store.sum(&self.name).await
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid || name.len() > MAX_TABLE_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "invalid table name: {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn table() -> (LedgerTable<Decimal, MemoryStore<Decimal>>, MemoryStore<Decimal>) {
        let store = MemoryStore::new();
        let table = LedgerTable::new(Arc::new(store.clone()), "balances").unwrap();
        (table, store)
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("balances").is_ok());
        assert!(validate_table_name("_player_coins_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2fast").is_err());
        assert!(validate_table_name("balances; DROP TABLE x").is_err());
        assert!(validate_table_name("quoted\"name").is_err());
        assert!(validate_table_name(&"a".repeat(64)).is_err());
    }

    #[tokio::test]
    async fn test_set_then_take() {
        let (table, _) = table();
        let u1 = Uuid::new_v4();

        table.set(u1, dec!(100.00)).await.unwrap();
        assert!(table.take(u1, dec!(30.00)).await.unwrap());
        assert_eq!(table.get(u1).await.unwrap(), Some(dec!(70.00)));
    }

    #[tokio::test]
    async fn test_take_on_fresh_key_creates_nothing() {
        let (table, store) = table();
        let u2 = Uuid::new_v4();

        assert!(!table.take(u2, dec!(1.00)).await.unwrap());
        assert_eq!(table.get(u2).await.unwrap(), None);
        assert_eq!(store.row_count("balances"), 0);
    }

    #[tokio::test]
    async fn test_declined_take_leaves_value() {
        let (table, _) = table();
        let key = Uuid::new_v4();

        table.set(key, dec!(5)).await.unwrap();
        assert!(!table.take(key, dec!(5.01)).await.unwrap());
        assert_eq!(table.get_or_zero(key).await.unwrap(), dec!(5));
    }

    #[tokio::test]
    async fn test_add_accumulates_and_total_follows() {
        let (table, _) = table();
        let u1 = Uuid::new_v4();
        let other = Uuid::new_v4();

        table.set(u1, dec!(70.00)).await.unwrap();
        table.add(u1, dec!(50.00)).await.unwrap();
        table.add(other, dec!(0.50)).await.unwrap();

        assert_eq!(table.get(u1).await.unwrap(), Some(dec!(120.00)));
        assert_eq!(table.total().await.unwrap(), dec!(120.50));
    }

    #[tokio::test]
    async fn test_zero_amounts_skip_store() {
        let (table, store) = table();
        let u3 = Uuid::new_v4();

        table.add(u3, dec!(0)).await.unwrap();
        assert!(table.take(u3, dec!(0)).await.unwrap());
        assert_eq!(store.statements_executed(), 0);
        assert!(!table.is_ready());
    }

    #[tokio::test]
    async fn test_zero_set_creates_row() {
        let (table, store) = table();
        let key = Uuid::new_v4();

        table.set(key, dec!(0)).await.unwrap();
        assert_eq!(table.get(key).await.unwrap(), Some(dec!(0)));
        assert_eq!(store.row_count("balances"), 1);
    }

    #[tokio::test]
    async fn test_negative_amounts_rejected_before_store() {
        let (table, store) = table();
        let key = Uuid::new_v4();

        assert!(matches!(
            table.set(key, dec!(-1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            table.add(key, dec!(-1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            table.take(key, dec!(-1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.statements_executed(), 0);
    }

    #[tokio::test]
    async fn test_empty_total_is_zero() {
        let (table, _) = table();
        assert_eq!(table.total().await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_schema_created_once() {
        let (table, store) = table();
        let key = Uuid::new_v4();

        table.get(key).await.unwrap();
        table.get(key).await.unwrap();
        assert!(table.is_ready());
        // one create + two selects
        assert_eq!(store.statements_executed(), 3);
    }

    #[tokio::test]
    async fn test_schema_failure_retried() {
        let (table, store) = table();
        store.set_available(false);

        let err = table.total().await.unwrap_err();
        assert!(matches!(err, Error::SchemaInitialization(_)));
        assert!(!table.is_ready());

        store.set_available(true);
        assert_eq!(table.total().await.unwrap(), Decimal::ZERO);
        assert!(table.is_ready());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let (table, store) = table();
        table.total().await.unwrap();
        store.set_available(false);

        let err = table.add(Uuid::new_v4(), dec!(1)).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_instances_share_store() {
        let store = MemoryStore::<i64>::new();
        let first: LedgerTable<i64, _> =
            LedgerTable::new(Arc::new(store.clone()), "counters").unwrap();
        let second: LedgerTable<i64, _> =
            LedgerTable::new(Arc::new(store.clone()), "counters").unwrap();
        let key = Uuid::new_v4();

        first.add(key, 2).await.unwrap();
        second.add(key, 3).await.unwrap();
        assert!(!first.take(key, 6).await.unwrap());
        assert!(second.take(key, 5).await.unwrap());
        assert_eq!(first.get(key).await.unwrap(), Some(0));
    }
}
