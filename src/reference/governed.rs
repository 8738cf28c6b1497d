//! Governed entities as one closed set
//!
//! The admin service and the stores exchange governed rows as
//! [`GovernedRecord`] so that a single audited write path covers all six
//! tables.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};
use crate::audit::tables;
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GovernedKind {
    Wallet,
    User,
    Tier,
    ExchangeRate,
    Trigger,
    Program,
}

impl GovernedKind {
    pub const ALL: [GovernedKind; 6] = [
        GovernedKind::Wallet,
        GovernedKind::User,
        GovernedKind::Tier,
        GovernedKind::ExchangeRate,
        GovernedKind::Trigger,
        GovernedKind::Program,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            GovernedKind::Wallet => tables::WALLETS,
            GovernedKind::User => tables::USERS,
            GovernedKind::Tier => tables::TIERS,
            GovernedKind::ExchangeRate => tables::EXCHANGE_RATES,
            GovernedKind::Trigger => tables::TRIGGERS,
            GovernedKind::Program => tables::PROGRAMS,
        }
    }

    /// Entity name used in `NOT_FOUND` errors
    pub fn entity(&self) -> &'static str {
        match self {
            GovernedKind::Wallet => "wallet",
            GovernedKind::User => "user",
            GovernedKind::Tier => "tier",
            GovernedKind::ExchangeRate => "exchange_rate",
            GovernedKind::Trigger => "trigger",
            GovernedKind::Program => "program",
        }
    }

    pub fn from_table(table: &str) -> Option<GovernedKind> {
        GovernedKind::ALL.into_iter().find(|k| k.table() == table)
    }
}

impl fmt::Display for GovernedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GovernedRecord {
    Wallet(Wallet),
    User(User),
    Tier(Tier),
    ExchangeRate(ExchangeRate),
    Trigger(Trigger),
    Program(Program),
}

impl GovernedRecord {
    pub fn kind(&self) -> GovernedKind {
        match self {
            GovernedRecord::Wallet(_) => GovernedKind::Wallet,
            GovernedRecord::User(_) => GovernedKind::User,
            GovernedRecord::Tier(_) => GovernedKind::Tier,
            GovernedRecord::ExchangeRate(_) => GovernedKind::ExchangeRate,
            GovernedRecord::Trigger(_) => GovernedKind::Trigger,
            GovernedRecord::Program(_) => GovernedKind::Program,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            GovernedRecord::Wallet(r) => &r.id,
            GovernedRecord::User(r) => &r.id,
            GovernedRecord::Tier(r) => &r.id,
            GovernedRecord::ExchangeRate(r) => &r.id,
            GovernedRecord::Trigger(r) => &r.id,
            GovernedRecord::Program(r) => &r.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            GovernedRecord::Wallet(r) => r.created_at,
            GovernedRecord::User(r) => r.created_at,
            GovernedRecord::Tier(r) => r.created_at,
            GovernedRecord::ExchangeRate(r) => r.created_at,
            GovernedRecord::Trigger(r) => r.created_at,
            GovernedRecord::Program(r) => r.created_at,
        }
    }

    /// JSON snapshot stored in the audit trail
    pub fn snapshot(&self) -> LedgerResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Typed access to a [`GovernedRecord`] variant
pub trait Governed: Sized + Serialize {
    const KIND: GovernedKind;

    fn from_record(record: GovernedRecord) -> LedgerResult<Self>;
    fn into_record(self) -> GovernedRecord;
}

macro_rules! governed {
    ($ty:ident) => {
        impl Governed for $ty {
            const KIND: GovernedKind = GovernedKind::$ty;

            fn from_record(record: GovernedRecord) -> LedgerResult<Self> {
                match record {
                    GovernedRecord::$ty(r) => Ok(r),
                    other => Err(LedgerError::Internal(format!(
                        "expected {} row, got {}",
                        Self::KIND,
                        other.kind()
                    ))),
                }
            }

            fn into_record(self) -> GovernedRecord {
                GovernedRecord::$ty(self)
            }
        }
    };
}

governed!(Wallet);
governed!(User);
governed!(Tier);
governed!(ExchangeRate);
governed!(Trigger);
governed!(Program);

/// One audited mutation
#[derive(Debug, Clone, PartialEq)]
pub enum GovernedChange {
    Create(GovernedRecord),
    Update(GovernedRecord),
    Delete(GovernedKind, String),
}

impl GovernedChange {
    pub fn kind(&self) -> GovernedKind {
        match self {
            GovernedChange::Create(r) | GovernedChange::Update(r) => r.kind(),
            GovernedChange::Delete(kind, _) => *kind,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            GovernedChange::Create(r) | GovernedChange::Update(r) => r.id(),
            GovernedChange::Delete(_, id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> Tier {
        let now = Utc::now();
        Tier {
            id: "gold".into(),
            name: "Gold".into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_kind_tables_roundtrip() {
        for kind in GovernedKind::ALL {
            assert_eq!(GovernedKind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(GovernedKind::from_table("accounts"), None);
    }

    #[test]
    fn test_snapshot_is_untagged() {
        let record = gold().into_record();
        let snapshot = record.snapshot().unwrap();
        assert_eq!(snapshot["id"], "gold");
        assert_eq!(snapshot["name"], "Gold");
        assert!(snapshot.get("Tier").is_none());
    }

    #[test]
    fn test_from_record_rejects_other_kind() {
        let record = gold().into_record();
        assert!(Tier::from_record(record.clone()).is_ok());
        assert_eq!(User::from_record(record).unwrap_err().code(), "INTERNAL_ERROR");
    }
}
