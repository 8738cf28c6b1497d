//! Account service: open, read, list, sum and close wallet accounts

use std::sync::Arc;

use chrono::Utc;

use super::models::{Account, AccountLookup};
use crate::context::RequestContext;
use crate::error::{LedgerError, LedgerResult};
use crate::reference::ReferenceResolver;
use crate::store::{LedgerStore, Page};

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    resolver: ReferenceResolver,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            resolver: ReferenceResolver::new(store.clone()),
            store,
        }
    }

    /// Open an account for `user_id` in `wallet_id`.
    ///
    /// `NOT_FOUND` if the wallet or user is absent, `CONFLICT` if the user
    /// already holds an account in this wallet.
    pub async fn create_account(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        user_id: &str,
    ) -> LedgerResult<Account> {
        if user_id.is_empty() {
            return Err(LedgerError::invalid_field("userId", "is required"));
        }
        ctx.run("create_account", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            let user = self.resolver.user(user_id).await?;
            let account = Account::open(&wallet.id, &user.id, Utc::now());
            let account = self.store.insert_account(&account).await.map_err(|e| match e {
                LedgerError::Duplicate(_) => LedgerError::Conflict(format!(
                    "user {} already has an account in wallet {}",
                    user.id, wallet.id
                )),
                other => other,
            })?;
            tracing::info!(
                request_id = %ctx.request_id,
                wallet_id = %wallet.id,
                account_id = %account.id,
                user_id = %user.id,
                "Account created"
            );
            Ok(account)
        })
        .await
    }

    pub async fn get_account(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        lookup: AccountLookup,
    ) -> LedgerResult<Account> {
        ctx.run("get_account", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            self.store
                .find_account(&wallet.id, &lookup)
                .await?
                .ok_or_else(|| LedgerError::not_found("account", lookup.describe()))
        })
        .await
    }

    /// Newest first
    pub async fn list_wallet_accounts(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        page: Page,
    ) -> LedgerResult<Vec<Account>> {
        ctx.run("list_accounts", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            self.store.list_accounts(&wallet.id, page).await
        })
        .await
    }

    /// Sum of balances in the wallet
    pub async fn wallet_accounts_sum(&self, ctx: &RequestContext, wallet_id: &str) -> LedgerResult<i128> {
        ctx.run("accounts_sum", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            Ok(self.store.ledger_sums(&wallet.id).await?.accounts_sum)
        })
        .await
    }

    /// Soft delete. Requires a zero balance; history is preserved.
    pub async fn delete_account(
        &self,
        ctx: &RequestContext,
        wallet_id: &str,
        account_id: &str,
    ) -> LedgerResult<Account> {
        ctx.run("delete_account", async {
            let wallet = self.resolver.wallet(wallet_id).await?;
            let account = self
                .store
                .deactivate_account(ctx, &wallet.id, account_id)
                .await?;
            tracing::info!(
                request_id = %ctx.request_id,
                wallet_id = %wallet.id,
                account_id,
                version = account.version.value(),
                "Account deactivated"
            );
            Ok(account)
        })
        .await
    }
}
