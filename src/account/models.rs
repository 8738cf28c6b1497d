//! Data models for wallet accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::money::{Amount, Version};

/// Per-user balance within one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// ULID
    pub id: String,
    pub wallet_id: String,
    pub user_id: String,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub balance: Amount,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub version: Version,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account: zero balance, version 0, active
    pub fn open(wallet_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            wallet_id: wallet_id.to_string(),
            user_id: user_id.to_string(),
            balance: Amount::ZERO,
            version: Version::INITIAL,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How to find an account inside a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountLookup {
    ById(String),
    ByUser(String),
}

impl AccountLookup {
    pub fn describe(&self) -> String {
        match self {
            AccountLookup::ById(id) => id.clone(),
            AccountLookup::ByUser(user) => format!("user:{}", user),
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        match self {
            AccountLookup::ById(id) => &account.id == id,
            AccountLookup::ByUser(user) => &account.user_id == user,
        }
    }
}
