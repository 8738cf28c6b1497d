//! Reference data: wallets, users, tiers, exchange rates, triggers, programs

pub mod admin;
pub mod governed;
pub mod models;
pub mod resolver;
pub mod validation;

pub use admin::ReferenceAdmin;
pub use governed::{Governed, GovernedChange, GovernedKind, GovernedRecord};
pub use models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
pub use resolver::ReferenceResolver;
pub use validation::Slug;
