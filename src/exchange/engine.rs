//! Exchange Engine
//!
//! ```text
//! resolve wallets, user, tier, rate
//!   -> pre-read from/to accounts, check balance
//!   -> convert amount (banker's rounding)
//!   -> store: lock lower wallet id first, verify versions, write both legs, commit
//! ```
//!
//! A deadlock restarts the whole sequence once, pre-read included.

use std::sync::Arc;

use super::{ExchangeOutcome, ExchangePlan, ExchangeRequest};
use crate::account::AccountLookup;
use crate::context::RequestContext;
use crate::dispatcher::ProgramDispatcher;
use crate::error::{LedgerError, LedgerResult};
use crate::money::{MoneyError, convert_amount};
use crate::reference::ReferenceResolver;
use crate::store::LedgerStore;
use crate::transaction::RetryPolicy;

pub struct ExchangeEngine {
    store: Arc<dyn LedgerStore>,
    resolver: ReferenceResolver,
    dispatcher: Option<Arc<ProgramDispatcher>>,
    retry: RetryPolicy,
}

impl ExchangeEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            store,
            dispatcher: None,
            retry: RetryPolicy {
                serialization_retries: 0,
                ..RetryPolicy::default()
            },
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

    pub async fn exchange(
        &self,
        ctx: &RequestContext,
        req: ExchangeRequest,
    ) -> LedgerResult<ExchangeOutcome> {
        if req.amount.is_zero() {
            return Err(LedgerError::invalid_field("amount", "must be greater than 0"));
        }
        if req.from_wallet_id == req.to_wallet_id {
            return Err(LedgerError::invalid_field(
                "toWalletId",
                "cannot exchange within the same wallet",
            ));
        }
        if req.user_id.is_empty() {
            return Err(LedgerError::invalid_field("userId", "is required"));
        }

        let outcome = ctx
            .run("exchange", async {
                self.retry
                    .run(ctx, "exchange", || self.attempt(ctx, &req))
                    .await
            })
            .await?;

        tracing::info!(
            request_id = %ctx.request_id,
            from_wallet_id = %req.from_wallet_id,
            to_wallet_id = %req.to_wallet_id,
            user_id = %req.user_id,
            debited = outcome.from.amount.value(),
            credited = outcome.to.amount.value(),
            from_tx_id = outcome.from.id,
            to_tx_id = outcome.to.id,
            "Exchange committed"
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(&req.from_wallet_id, &outcome.from_account, &outcome.from);
            dispatcher.dispatch(&req.to_wallet_id, &outcome.to_account, &outcome.to);
        }

        Ok(outcome)
    }

    /// Resolve, pre-read and plan; then hand the plan to the store
    async fn attempt(
        &self,
        ctx: &RequestContext,
        req: &ExchangeRequest,
    ) -> LedgerResult<ExchangeOutcome> {
        let from_wallet = self.resolver.wallet(&req.from_wallet_id).await?;
        let to_wallet = self.resolver.wallet(&req.to_wallet_id).await?;
        let user = self.resolver.user(&req.user_id).await?;
        let tier_id = user
            .tier_id
            .as_deref()
            .ok_or_else(|| LedgerError::not_found("tier", format!("tier of user {}", user.id)))?;
        let tier = self.resolver.tier(tier_id).await?;
        let rate = self
            .resolver
            .exchange_rate(&from_wallet.id, &to_wallet.id, &tier.id)
            .await?;

        let from_account = self
            .store
            .find_account(&from_wallet.id, &AccountLookup::ByUser(user.id.clone()))
            .await?
            .ok_or_else(|| {
                LedgerError::not_found("account", format!("{}/user:{}", from_wallet.id, user.id))
            })?;
        if from_account.balance < req.amount {
            return Err(LedgerError::InsufficientBalance {
                available: from_account.balance.value(),
                requested: req.amount.value(),
            });
        }
        let to_account = self
            .store
            .find_account(&to_wallet.id, &AccountLookup::ByUser(user.id.clone()))
            .await?;

        let credited = convert_amount(
            req.amount,
            from_wallet.is_monetary,
            to_wallet.is_monetary,
            rate.rate,
        )
        .map_err(|e| match e {
            MoneyError::InvalidRate => {
                LedgerError::Internal(format!("exchange rate {} is not positive", rate.id))
            }
            other => LedgerError::Unprocessable(other.to_string()),
        })?;
        if credited.is_zero() {
            return Err(LedgerError::Unprocessable(format!(
                "{} {} converts to zero {}",
                req.amount, from_wallet.id, to_wallet.id
            )));
        }

        let plan = ExchangePlan {
            exchange_id: ulid::Ulid::new().to_string(),
            from_wallet_id: from_wallet.id,
            to_wallet_id: to_wallet.id,
            user_id: user.id,
            amount: req.amount,
            credited,
            rate: rate.rate,
            from_version: from_account.version,
            to_version: to_account.map(|a| a.version),
            actor: ctx.actor.clone(),
        };
        self.store.exchange(ctx, &plan).await
    }
}
