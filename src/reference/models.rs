//! Reference data models
//!
//! Rows of the shared namespace. The ledger engines only read these; all
//! mutations go through [`super::admin::ReferenceAdmin`], which audits them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transaction::TransactionType;

/// Logical ledger with its own storage namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    /// Slug, also the namespace suffix (`wallet_<id>`)
    #[schema(example = "points")]
    pub id: String,
    pub name: String,
    pub currency_scale: i32,
    /// Amounts are cents of a fiat currency
    pub is_monetary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User classification used to look up exchange rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    #[schema(example = "gold")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[schema(example = "u1")]
    pub id: String,
    pub tier_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversion rate for `(from, to, tier)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub id: String,
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    pub tier_id: String,
    #[schema(value_type = String, example = "2.5")]
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Topic definition: committed transactions matching it are published to `slug`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: String,
    #[schema(example = "points-earned")]
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` matches every wallet
    pub wallet_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    pub fn matches(&self, wallet_id: &str, tx_type: TransactionType) -> bool {
        self.is_active
            && self.transaction_type == tx_type
            && self.wallet_id.as_deref().is_none_or(|w| w == wallet_id)
    }
}

/// Rule definition consumed by the external rule engine; stored verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub trigger_id: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub condition: serde_json::Value,
    #[schema(value_type = Object)]
    pub effects: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
