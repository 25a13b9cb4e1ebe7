//! Balance Ledger
//!
//! One non-negative value per UUID key on a shared backing store, safe for
//! concurrent callers and for several processes pointed at one database.
//!
//! # Architecture
//!
//! - **Ledger Table**: schema plus the atomic statements (`add`, `set`,
//!   `take`, `get`, `total`) run against a [`store::LedgerStore`]
//! - **Async Facade**: every operation returns a [`Deferred`] at once; store
//!   work runs on a bounded worker pool, never on the caller's thread
//!
//! # Invariants
//!
//! - Non-negativity: no stored value is ever below zero
//! - Atomic check-and-act: `take` is one guarded update, never read-then-write
//! - No lost updates: concurrent `add`s on one key are all reflected

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod store;
pub mod table;
pub mod telemetry;
pub mod value;

// Re-exports
pub use crate::config::LedgerConfig;
pub use dispatch::{Deferred, Dispatcher};
pub use error::{Error, Result};
pub use facade::{AsyncLedger, CounterLedger, DecimalLedger};
pub use metrics::Metrics;
pub use store::{LedgerStore, MemoryStore, PgStore};
pub use table::LedgerTable;
pub use value::LedgerValue;
