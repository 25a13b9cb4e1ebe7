//! Non-blocking facade over a ledger table
//!
//! Every operation returns a [`Deferred`] immediately. Argument checks run
//! on the caller's thread so a negative amount fails at once without taking
//! a worker slot, and zero-amount `add`/`take` complete without touching the
//! store. Everything else is dispatched.

use crate::config::LedgerConfig;
use crate::dispatch::{Deferred, Dispatcher};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::store::{LedgerStore, PgStore};
use crate::table::LedgerTable;
use crate::value::{validate_amount, LedgerValue};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Decimal balances on Postgres
pub type DecimalLedger = AsyncLedger<Decimal, PgStore>;

/// Integer counters on Postgres
pub type CounterLedger = AsyncLedger<i64, PgStore>;

/// Ledger table whose operations never block the caller
pub struct AsyncLedger<V, S> {
    table: Arc<LedgerTable<V, S>>,
    dispatcher: Dispatcher,
    metrics: Option<Metrics>,
}

impl<V, S> Clone for AsyncLedger<V, S> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<V> AsyncLedger<V, PgStore>
where
    V: LedgerValue,
{
    /// Connect to Postgres and dispatch onto the current runtime
    pub async fn connect(config: &LedgerConfig, table: &str) -> Result<Self> {
        let store = PgStore::connect(&config.database).await?;
        let table = LedgerTable::new(Arc::new(store), table)?;
        let dispatcher = Dispatcher::current(config.dispatcher.worker_limit)?;

        info!(
            table = table.name(),
            worker_limit = dispatcher.worker_limit(),
            "Ledger connected"
        );
        Ok(Self::new(table, dispatcher))
    }
}

impl<V, S> AsyncLedger<V, S>
where
    V: LedgerValue,
    S: LedgerStore<V>,
{
    /// Wrap `table`, dispatching its store work through `dispatcher`
    pub fn new(table: LedgerTable<V, S>, dispatcher: Dispatcher) -> Self {
        Self {
            table: Arc::new(table),
            dispatcher,
            metrics: None,
        }
    }

    /// Record operation outcomes into `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying table
    pub fn table(&self) -> &LedgerTable<V, S> {
        &self.table
    }

    /// Attached metrics, if any
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Stored value for `key`, `None` if absent
    pub fn get(&self, key: Uuid) -> Deferred<Option<V>> {
        self.schedule("get", never_declined, move |table| async move {
            table.get(key).await
        })
    }

    /// Stored value for `key`, zero if absent
    pub fn get_or_zero(&self, key: Uuid) -> Deferred<V> {
        self.schedule("get", never_declined, move |table| async move {
            table.get_or_zero(key).await
        })
    }

    /// Overwrite the value for `key`
    pub fn set(&self, key: Uuid, amount: V) -> Deferred<()> {
        if let Err(e) = self.precheck("set", &amount) {
            return Deferred::failed(e);
        }
        self.schedule("set", never_declined, move |table| async move {
            table.set(key, amount).await
        })
    }

    /// Add `amount` to the value for `key`
    pub fn add(&self, key: Uuid, amount: V) -> Deferred<()> {
        if let Err(e) = self.precheck("add", &amount) {
            return Deferred::failed(e);
        }
        if amount.is_zero() {
            return Deferred::completed(());
        }
        self.schedule("add", never_declined, move |table| async move {
            table.add(key, amount).await
        })
    }

    /// Take `amount` from `key`; resolves to `false` if the balance is short
    pub fn take(&self, key: Uuid, amount: V) -> Deferred<bool> {
        if let Err(e) = self.precheck("take", &amount) {
            return Deferred::failed(e);
        }
        if amount.is_zero() {
            return Deferred::completed(true);
        }
        self.schedule(
            "take",
            |taken: &bool| !*taken,
            move |table| async move { table.take(key, amount).await },
        )
    }

    /// Sum of all values
    pub fn total(&self) -> Deferred<V> {
        self.schedule("total", never_declined, |table| async move {
            table.total().await
        })
    }

    fn precheck(&self, operation: &str, amount: &V) -> Result<()> {
        validate_amount(amount).map_err(|e| {
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(operation, &e);
            }
            e
        })
    }

    fn schedule<T, F, Fut>(
        &self,
        operation: &'static str,
        declined: fn(&T) -> bool,
        op: F,
    ) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<LedgerTable<V, S>>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let work = op(Arc::clone(&self.table));
        let metrics = self.metrics.clone();

        self.dispatcher.dispatch(async move {
            let started = Instant::now();
            let result = work.await;

            if let Some(metrics) = &metrics {
                match &result {
                    Ok(value) if declined(value) => metrics.record_declined(started.elapsed()),
                    Ok(_) => metrics.record_success(operation, started.elapsed()),
                    Err(e) => metrics.record_failure(operation, e),
                }
            }
            result
        })
    }
}

fn never_declined<T>(_: &T) -> bool {
    false
}
