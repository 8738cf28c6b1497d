//! Audit trail of governed reference data
//!
//! Every governed mutation carries a [`NewAudit`] that the store writes in
//! the same database transaction as the mutation itself.

pub mod models;

pub use models::{Audit, AuditContext, AuditOperation, NewAudit};

/// Tables whose mutations are audited
pub mod tables {
    pub const WALLETS: &str = "wallets";
    pub const USERS: &str = "users";
    pub const TIERS: &str = "tiers";
    pub const EXCHANGE_RATES: &str = "exchange_rates";
    pub const TRIGGERS: &str = "triggers";
    pub const PROGRAMS: &str = "programs";

    pub const ALL: [&str; 6] = [WALLETS, USERS, TIERS, EXCHANGE_RATES, TRIGGERS, PROGRAMS];

    /// Canonical static name for a user-supplied table name
    pub fn lookup(name: &str) -> Option<&'static str> {
        ALL.iter().copied().find(|t| *t == name)
    }
}
