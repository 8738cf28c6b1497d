//! Cross-wallet exchange
//!
//! Moves value from one wallet to another for the same user at the rate of
//! the user's tier. Both legs share one database transaction and one
//! exchange id (`metadata.reference`).

pub mod engine;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::account::Account;
use crate::context::Actor;
use crate::money::{Amount, Version};
use crate::transaction::{Transaction, TransactionKind, build_metadata};

pub use engine::ExchangeEngine;

#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub user_id: String,
    #[schema(value_type = i64)]
    pub amount: Amount,
}

/// Fully resolved exchange, ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePlan {
    /// ULID shared by both legs as `metadata.reference`
    pub exchange_id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub credited: Amount,
    pub rate: Decimal,
    /// Version of the source account at pre-read
    pub from_version: Version,
    /// Version of the destination account at pre-read; `None` if it did not exist
    pub to_version: Option<Version>,
    pub actor: Actor,
}

impl ExchangePlan {
    /// Metadata of one leg; `counter_wallet_id` is the other side
    pub fn leg_metadata(&self, counter_wallet_id: &str) -> serde_json::Value {
        let extra = serde_json::json!({
            "exchangeRate": self.rate.to_string(),
            "counterWalletId": counter_wallet_id,
            "debited": self.amount.value(),
            "credited": self.credited.value(),
        });
        build_metadata(TransactionKind::Exchange, Some(&self.exchange_id), Some(&extra))
    }

    /// Wallets in lock order: lexicographically lower first
    pub fn lock_order(&self) -> [&str; 2] {
        if self.from_wallet_id <= self.to_wallet_id {
            [&self.from_wallet_id, &self.to_wallet_id]
        } else {
            [&self.to_wallet_id, &self.from_wallet_id]
        }
    }
}

/// Committed result of an exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub from: Transaction,
    pub to: Transaction,
    pub from_account: Account,
    pub to_account: Account,
}

/// Both legs as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ExchangeResult {
    pub from: Transaction,
    pub to: Transaction,
}

impl From<ExchangeOutcome> for ExchangeResult {
    fn from(outcome: ExchangeOutcome) -> Self {
        Self {
            from: outcome.from,
            to: outcome.to,
        }
    }
}
