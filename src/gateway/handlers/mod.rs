//! HTTP handlers
//!
//! - [`health`]: liveness
//! - [`ledger`]: backoffice accounts, postings, exchange, integrity
//! - [`reference`]: backoffice CRUD of governed entities
//! - [`audit`]: audit trail and dead letters
//! - [`app`]: user-scoped reads and exchange

pub mod app;
pub mod audit;
pub mod health;
pub mod ledger;
pub mod reference;

pub use health::{HealthResponse, health_check};
