//! Wallet Ledger - multi-wallet ledger engine
//!
//! Per-user balances across named wallets, optimistic-locked postings,
//! tier-priced cross-wallet exchange and balance/log integrity checks.
//!
//! # Modules
//!
//! - [`money`] - `Amount`, `Version`, exchange conversion
//! - [`context`] - `RequestContext` (actor, request id, deadline)
//! - [`error`] - `LedgerError` taxonomy
//! - [`reference`] - governed reference data, resolver and audited admin
//! - [`account`] - accounts and `AccountService`
//! - [`transaction`] - postings, `TransactionEngine`, retry policy
//! - [`exchange`] - two-leg cross-wallet exchange
//! - [`integrity`] - balance versus transaction-log check
//! - [`audit`] - audit rows for governed changes
//! - [`dispatcher`] - post-commit program events with dead letters
//! - [`store`] - `LedgerStore` with PostgreSQL and in-memory backends
//! - [`db`] - connection pool and per-wallet namespaces
//! - [`gateway`] - axum HTTP surface

// Core types - must be first!
pub mod context;
pub mod error;
pub mod money;

// Ledger components
pub mod account;
pub mod audit;
pub mod exchange;
pub mod integrity;
pub mod reference;
pub mod transaction;

// Storage and delivery
pub mod db;
pub mod dispatcher;
pub mod store;

// Service plumbing
pub mod config;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use account::{Account, AccountLookup, AccountService};
pub use context::{Actor, ActorType, RequestContext};
pub use error::{LedgerError, LedgerResult};
pub use exchange::{ExchangeEngine, ExchangeRequest};
pub use integrity::{IntegrityChecker, IntegrityReport};
pub use money::{Amount, Version};
pub use store::{LedgerStore, MemoryStore, Page, PgStore};
pub use transaction::{PostRequest, Transaction, TransactionEngine, TransactionKind, TransactionType};
