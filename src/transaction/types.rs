//! Transaction Core Types
//!
//! `TransactionType` is what the ledger stores (CREDIT / DEBIT);
//! `TransactionKind` is the business category recorded in `metadata.kind`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::context::ActorType;
use crate::error::LedgerError;
use crate::money::{Amount, Version};

/// Ledger direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
        }
    }

    /// Signed effect of `amount` on a balance
    #[inline]
    pub fn signed(&self, amount: Amount) -> i64 {
        match self {
            TransactionType::Credit => amount.value(),
            TransactionType::Debit => -amount.value(),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(TransactionType::Credit),
            "DEBIT" => Ok(TransactionType::Debit),
            other => Err(LedgerError::Internal(format!(
                "unknown transaction type: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for TransactionType {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Business category of a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Purchase,
    Refund,
    TransferIn,
    TransferOut,
    /// Either leg of a cross-wallet exchange; not accepted by `post`
    Exchange,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Refund => "REFUND",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::Exchange => "EXCHANGE",
        }
    }

    /// Sign rule for single-account postings.
    ///
    /// Returns `None` for `Exchange`, whose direction depends on the leg.
    pub fn transaction_type(&self) -> Option<TransactionType> {
        match self {
            TransactionKind::Deposit | TransactionKind::Refund | TransactionKind::TransferIn => {
                Some(TransactionType::Credit)
            }
            TransactionKind::Withdraw
            | TransactionKind::Purchase
            | TransactionKind::TransferOut => Some(TransactionType::Debit),
            TransactionKind::Exchange => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "WITHDRAW" => Ok(TransactionKind::Withdraw),
            "PURCHASE" => Ok(TransactionKind::Purchase),
            "REFUND" => Ok(TransactionKind::Refund),
            "TRANSFER_IN" => Ok(TransactionKind::TransferIn),
            "TRANSFER_OUT" => Ok(TransactionKind::TransferOut),
            "EXCHANGE" => Ok(TransactionKind::Exchange),
            other => Err(LedgerError::BadRequest(format!(
                "unknown transaction kind: {}",
                other
            ))),
        }
    }
}

/// Append-only ledger record against one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Wallet-scoped id from the wallet's allocator
    pub id: i64,
    pub account_id: String,
    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub tx_type: TransactionType,
    #[sqlx(try_from = "String")]
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub amount: Amount,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub previous_balance: Amount,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub new_balance: Amount,
    #[sqlx(try_from = "i64")]
    #[schema(value_type = i64)]
    pub version: Version,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `metadata.kind`, if it parses
    pub fn kind(&self) -> Option<TransactionKind> {
        self.metadata
            .get("kind")
            .and_then(|k| k.as_str())
            .and_then(|k| k.parse().ok())
    }

    /// `metadata.reference`
    pub fn reference(&self) -> Option<&str> {
        self.metadata.get("reference").and_then(|r| r.as_str())
    }
}

/// Build the metadata blob stored with a transaction.
///
/// Caller-supplied metadata is kept verbatim; `kind` and `reference` are
/// always written by the engine.
pub fn build_metadata(
    kind: TransactionKind,
    reference: Option<&str>,
    extra: Option<&serde_json::Value>,
) -> serde_json::Value {
    let mut map = match extra {
        Some(serde_json::Value::Object(m)) => m.clone(),
        Some(other) => {
            let mut m = serde_json::Map::new();
            m.insert("data".to_string(), other.clone());
            m
        }
        None => serde_json::Map::new(),
    };
    map.insert(
        "kind".to_string(),
        serde_json::Value::String(kind.as_str().to_string()),
    );
    if let Some(reference) = reference {
        map.insert(
            "reference".to_string(),
            serde_json::Value::String(reference.to_string()),
        );
    }
    serde_json::Value::Object(map)
}

/// Posting request for a single account
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub reference: Option<String>,
    /// Optimistic check; `None` relies on the row lock alone
    pub expected_version: Option<Version>,
    pub metadata: Option<serde_json::Value>,
}

impl PostRequest {
    pub fn new(account_id: impl Into<String>, kind: TransactionKind, amount: Amount) -> Self {
        Self {
            account_id: account_id.into(),
            kind,
            amount,
            actor_type: ActorType::System,
            actor_id: None,
            reference: None,
            expected_version: None,
            metadata: None,
        }
    }

    pub fn expecting(mut self, version: Version) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn by(mut self, actor_type: ActorType, actor_id: Option<String>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id;
        self
    }
}
