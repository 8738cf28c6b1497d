//! Ledger storage
//!
//! [`LedgerStore`] is the seam between the engines and durable state. Every
//! method is one unit of work: it either commits completely or leaves no
//! trace.
//!
//! - [`postgres::PgStore`]: production store, one schema per wallet
//! - [`memory::MemoryStore`]: in-process store with the same semantics, used
//!   by tests and local runs without a database

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::account::{Account, AccountLookup};
use crate::audit::{Audit, NewAudit};
use crate::context::RequestContext;
use crate::dispatcher::dead_letter::{DeadLetter, NewDeadLetter};
use crate::error::{LedgerError, LedgerResult};
use crate::exchange::{ExchangeOutcome, ExchangePlan};
use crate::reference::governed::{GovernedChange, GovernedKind, GovernedRecord};
use crate::reference::models::{ExchangeRate, Trigger};
use crate::transaction::{PostRequest, Transaction, TransactionType};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Validated page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    /// `page` and `limit` must be at least 1; `limit` above 100 is clamped.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> LedgerResult<Self> {
        let page = page.unwrap_or(DEFAULT_PAGE as i64);
        let limit = limit.unwrap_or(DEFAULT_LIMIT as i64);
        if page < 1 {
            return Err(LedgerError::invalid_field("page", "must be at least 1"));
        }
        if limit < 1 {
            return Err(LedgerError::invalid_field("limit", "must be at least 1"));
        }
        let page = u32::try_from(page)
            .map_err(|_| LedgerError::invalid_field("page", "is too large"))?;
        Ok(Self {
            page,
            limit: limit.min(MAX_LIMIT as i64) as u32,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }

    /// Slice an already ordered collection
    pub fn slice<T: Clone>(&self, rows: &[T]) -> Vec<T> {
        rows.iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .cloned()
            .collect()
    }
}

/// Result of a single-account posting
#[derive(Debug, Clone, PartialEq)]
pub struct PostOutcome {
    pub transaction: Transaction,
    pub account: Account,
    /// Served from the idempotency lookup; nothing was written
    pub replayed: bool,
}

/// Balance totals of one wallet, read in one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Widened past `i64`: many valid balances can add up beyond `i64::MAX`
pub struct LedgerSums {
    pub accounts_sum: i128,
    /// Σ CREDIT − Σ DEBIT
    pub transactions_sum: i128,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Liveness check used by the health endpoint
    async fn ping(&self) -> LedgerResult<()>;

    // === Reference data ===

    async fn get_record(&self, kind: GovernedKind, id: &str)
    -> LedgerResult<Option<GovernedRecord>>;

    /// Ordered by `created_at desc, id desc`
    async fn list_records(&self, kind: GovernedKind, page: Page)
    -> LedgerResult<Vec<GovernedRecord>>;

    async fn find_exchange_rate(
        &self,
        from_wallet_id: &str,
        to_wallet_id: &str,
        tier_id: &str,
    ) -> LedgerResult<Option<ExchangeRate>>;

    /// Active triggers covering `tx_type` in `wallet_id`
    async fn matching_triggers(
        &self,
        wallet_id: &str,
        tx_type: TransactionType,
    ) -> LedgerResult<Vec<Trigger>>;

    /// Apply a governed mutation and its audit row in one commit.
    ///
    /// Creating a wallet also creates its namespace. Deleting a record that
    /// is still referenced fails `CONFLICT`. For updates and deletes the store
    /// fills `old_record` from the row it replaces, read under the same lock.
    async fn apply_change(&self, change: GovernedChange, audit: NewAudit) -> LedgerResult<Audit>;

    // === Audit ===

    /// Oldest first
    async fn audit_for_record(&self, table: &str, record_id: &str) -> LedgerResult<Vec<Audit>>;

    /// Newest first
    async fn list_audit(&self, page: Page) -> LedgerResult<Vec<Audit>>;

    // === Accounts ===

    /// `CONFLICT` when `(wallet, user)` already has an account
    async fn insert_account(&self, account: &Account) -> LedgerResult<Account>;

    async fn find_account(
        &self,
        wallet_id: &str,
        lookup: &AccountLookup,
    ) -> LedgerResult<Option<Account>>;

    /// Ordered by `created_at desc, id desc`
    async fn list_accounts(&self, wallet_id: &str, page: Page) -> LedgerResult<Vec<Account>>;

    /// Soft delete: requires zero balance and an active account
    async fn deactivate_account(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        account_id: &str,
    ) -> LedgerResult<Account>;

    // === Ledger ===

    /// Lock, check and apply one posting
    async fn post(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        req: &PostRequest,
    ) -> LedgerResult<PostOutcome>;

    /// Both legs of an exchange in one commit
    async fn exchange(&self, ctx: &RequestContext, plan: &ExchangePlan)
    -> LedgerResult<ExchangeOutcome>;

    /// Ordered by `id desc`; optionally restricted to one account
    async fn list_transactions(
        &self,
        wallet_id: &str,
        account_id: Option<&str>,
        page: Page,
    ) -> LedgerResult<Vec<Transaction>>;

    async fn ledger_sums(&self, wallet_id: &str) -> LedgerResult<LedgerSums>;

    // === Dead letters ===

    async fn record_dead_letter(&self, letter: NewDeadLetter) -> LedgerResult<DeadLetter>;

    async fn list_dead_letters(&self, page: Page) -> LedgerResult<Vec<DeadLetter>>;
}
