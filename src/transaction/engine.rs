//! Transaction Engine
//!
//! Single-account debit/credit under a row lock plus an optimistic version
//! check. The pure planning step is shared by every store so that the
//! in-memory and PostgreSQL paths apply identical rules:
//!
//! ```text
//! lock row -> idempotency lookup -> version check -> balance check
//!          -> new balance, version + 1 -> allocate id -> insert tx -> update row
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::retry::RetryPolicy;
use super::types::{PostRequest, Transaction, TransactionKind, TransactionType, build_metadata};
use crate::account::Account;
use crate::context::{ActorType, RequestContext};
use crate::dispatcher::ProgramDispatcher;
use crate::error::{LedgerError, LedgerResult};
use crate::money::{Amount, MoneyError, Version};
use crate::reference::ReferenceResolver;
use crate::store::{LedgerStore, PostOutcome};

// ============================================================================
// Planning
// ============================================================================

/// Balance change computed against a locked account row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movement {
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub previous_balance: Amount,
    pub new_balance: Amount,
    /// Account version after the mutation
    pub version: Version,
}

impl Movement {
    pub fn apply_to(&self, account: &mut Account, now: DateTime<Utc>) {
        account.balance = self.new_balance;
        account.version = self.version;
        account.updated_at = now;
    }

    #[allow(clippy::too_many_arguments)]
    pub fn into_transaction(
        self,
        id: i64,
        account_id: &str,
        actor_type: ActorType,
        actor_id: Option<String>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Transaction {
        Transaction {
            id,
            account_id: account_id.to_string(),
            tx_type: self.tx_type,
            actor_type,
            actor_id,
            amount: self.amount,
            previous_balance: self.previous_balance,
            new_balance: self.new_balance,
            version: self.version,
            metadata,
            created_at,
        }
    }
}

/// Version and balance checks against a locked row.
///
/// `expected_version = None` skips the optimistic check and relies on the
/// row lock alone.
pub fn plan_movement(
    account: &Account,
    tx_type: TransactionType,
    amount: Amount,
    expected_version: Option<Version>,
) -> LedgerResult<Movement> {
    if !account.is_active {
        return Err(LedgerError::Conflict(format!(
            "account {} is inactive",
            account.id
        )));
    }

    if let Some(expected) = expected_version
        && expected != account.version
    {
        return Err(LedgerError::VersionMismatch {
            account_id: account.id.clone(),
            expected: expected.value(),
            actual: account.version.value(),
        });
    }

    let new_balance = match tx_type {
        TransactionType::Credit => account.balance.checked_add(amount).map_err(|_| {
            LedgerError::Unprocessable(format!("credit would overflow account {}", account.id))
        })?,
        TransactionType::Debit => {
            account
                .balance
                .checked_sub(amount)
                .map_err(|_: MoneyError| LedgerError::InsufficientBalance {
                    available: account.balance.value(),
                    requested: amount.value(),
                })?
        }
    };

    Ok(Movement {
        tx_type,
        amount,
        previous_balance: account.balance,
        new_balance,
        version: account.version.next(),
    })
}

/// Request-level checks that need no database access
pub fn validate_post(req: &PostRequest) -> LedgerResult<TransactionType> {
    let tx_type = req.kind.transaction_type().ok_or_else(|| {
        LedgerError::invalid_field("kind", "EXCHANGE is only posted by the exchange operation")
    })?;
    if req.amount.is_zero() {
        return Err(LedgerError::invalid_field("amount", "must be greater than 0"));
    }
    if req.account_id.is_empty() {
        return Err(LedgerError::invalid_field("accountId", "is required"));
    }
    if req.reference.as_deref().is_some_and(str::is_empty) {
        return Err(LedgerError::invalid_field("reference", "must not be empty"));
    }
    Ok(tx_type)
}

/// Everything a store needs to write one posting
#[derive(Debug, Clone, PartialEq)]
pub struct PostingPlan {
    pub movement: Movement,
    pub metadata: serde_json::Value,
}

/// Plan a posting against the locked, freshly read `account`.
///
/// The idempotency lookup must already have missed.
pub fn plan_posting(account: &Account, req: &PostRequest) -> LedgerResult<PostingPlan> {
    let tx_type = validate_post(req)?;
    let movement = plan_movement(account, tx_type, req.amount, req.expected_version)?;
    let metadata = build_metadata(req.kind, req.reference.as_deref(), req.metadata.as_ref());
    Ok(PostingPlan { movement, metadata })
}

/// Whether `tx` is the earlier posting for `(kind, reference)`
pub fn is_replay_of(tx: &Transaction, kind: TransactionKind, reference: &str) -> bool {
    tx.kind() == Some(kind) && tx.reference() == Some(reference)
}

// ============================================================================
// Engine
// ============================================================================

pub struct TransactionEngine {
    store: Arc<dyn LedgerStore>,
    resolver: ReferenceResolver,
    dispatcher: Option<Arc<ProgramDispatcher>>,
    retry: RetryPolicy,
}

impl TransactionEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            store,
            dispatcher: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<ProgramDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Post one debit or credit to an account of `wallet_id`.
    ///
    /// A repeated `(kind, reference)` on the same account returns the
    /// original transaction and writes nothing.
    pub async fn post(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        req: PostRequest,
    ) -> LedgerResult<PostOutcome> {
        validate_post(&req)?;

        let outcome = ctx
            .run("post", async {
                let wallet = self.resolver.wallet(wallet_id).await?;
                self.retry
                    .run(ctx, "post", || self.store.post(ctx, &wallet.id, &req))
                    .await
            })
            .await?;

        if outcome.replayed {
            tracing::info!(
                request_id = %ctx.request_id,
                wallet_id,
                account_id = %outcome.account.id,
                tx_id = outcome.transaction.id,
                "Idempotent replay, nothing written"
            );
        } else {
            tracing::info!(
                request_id = %ctx.request_id,
                wallet_id,
                account_id = %outcome.account.id,
                tx_id = outcome.transaction.id,
                kind = %req.kind,
                amount = outcome.transaction.amount.value(),
                version = outcome.account.version.value(),
                "Transaction committed"
            );
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.dispatch(wallet_id, &outcome.account, &outcome.transaction);
            }
        }

        Ok(outcome)
    }

    /// Newest first
    pub async fn list(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        account_id: Option<&str>,
        page: crate::store::Page,
    ) -> LedgerResult<Vec<Transaction>> {
        ctx.run("list_transactions", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            self.store.list_transactions(&wallet.id, account_id, page).await
        })
        .await
    }
}
