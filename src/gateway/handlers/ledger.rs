//! Backoffice ledger handlers: accounts, postings, exchange, integrity

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    ApiResult, CreateAccountBody, ErrorResponse, JsonBody, PageQuery, PostTransactionBody,
    accepted, created, ok,
};
use crate::account::{Account, AccountLookup};
use crate::context::RequestContext;
use crate::error::LedgerError;
use crate::exchange::{ExchangeRequest, ExchangeResult};
use crate::integrity::IntegrityReport;
use crate::transaction::Transaction;

// ============================================================================
// Accounts
// ============================================================================

/// Open an account for a user
#[utoipa::path(
    post,
    path = "/api/v1/backoffice/wallets/{id}/accounts",
    params(("id" = String, Path, description = "Wallet id")),
    request_body = CreateAccountBody,
    responses(
        (status = 201, description = "Account created", body = Account),
        (status = 404, description = "Wallet or user not found", body = ErrorResponse),
        (status = 409, description = "User already has an account in this wallet", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Accounts"
)]
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    JsonBody(body): JsonBody<CreateAccountBody>,
) -> ApiResult<Account> {
    body.validate().map_err(LedgerError::from)?;
    let account = state
        .accounts
        .create_account(&ctx, &wallet_id, &body.user_id)
        .await?;
    created(account)
}

/// List accounts, newest first
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/wallets/{id}/accounts",
    params(("id" = String, Path, description = "Wallet id"), PageQuery),
    responses(
        (status = 200, description = "Accounts", body = Vec<Account>),
        (status = 400, description = "Invalid page window", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Accounts"
)]
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Account>> {
    let page = query.page()?;
    ok(state
        .accounts
        .list_wallet_accounts(&ctx, &wallet_id, page)
        .await?)
}

/// Sum of all balances in the wallet
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/wallets/{id}/accounts/sum",
    params(("id" = String, Path, description = "Wallet id")),
    responses((status = 200, description = "Balance total", body = i128)),
    security(("bearer_jwt" = [])),
    tag = "Accounts"
)]
pub async fn accounts_sum(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
) -> ApiResult<i128> {
    ok(state.accounts.wallet_accounts_sum(&ctx, &wallet_id).await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/backoffice/wallets/{id}/accounts/{account_id}",
    params(
        ("id" = String, Path, description = "Wallet id"),
        ("account_id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 200, description = "Account", body = Account),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Accounts"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((wallet_id, account_id)): Path<(String, String)>,
) -> ApiResult<Account> {
    ok(state
        .accounts
        .get_account(&ctx, &wallet_id, AccountLookup::ById(account_id))
        .await?)
}

/// Close an account with zero balance
#[utoipa::path(
    delete,
    path = "/api/v1/backoffice/wallets/{id}/accounts/{account_id}",
    params(
        ("id" = String, Path, description = "Wallet id"),
        ("account_id" = String, Path, description = "Account id")
    ),
    responses(
        (status = 202, description = "Account deactivated", body = Account),
        (status = 409, description = "Balance is not zero", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Accounts"
)]
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((wallet_id, account_id)): Path<(String, String)>,
) -> ApiResult<Account> {
    accepted(state.accounts.delete_account(&ctx, &wallet_id, &account_id).await?)
}

// ============================================================================
// Transactions
// ============================================================================

/// Post a debit or credit
///
/// A repeated `(kind, reference)` on the same account returns the original
/// transaction.
#[utoipa::path(
    post,
    path = "/api/v1/backoffice/wallets/{id}/transactions",
    params(("id" = String, Path, description = "Wallet id")),
    request_body = PostTransactionBody,
    responses(
        (status = 201, description = "Transaction committed", body = Transaction),
        (status = 200, description = "Earlier transaction with the same reference", body = Transaction),
        (status = 406, description = "Insufficient balance", body = ErrorResponse),
        (status = 409, description = "Version mismatch", body = ErrorResponse),
        (status = 408, description = "Deadline exceeded", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Transactions"
)]
pub async fn post_transaction(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    JsonBody(body): JsonBody<PostTransactionBody>,
) -> ApiResult<Transaction> {
    let req = body.into_request()?;
    let outcome = state.transactions.post(&ctx, &wallet_id, req).await?;
    if outcome.replayed {
        ok(outcome.transaction)
    } else {
        created(outcome.transaction)
    }
}

/// Transactions of the wallet, newest first
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/wallets/{id}/transactions",
    params(("id" = String, Path, description = "Wallet id"), PageQuery),
    responses((status = 200, description = "Transactions", body = Vec<Transaction>)),
    security(("bearer_jwt" = [])),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Transaction>> {
    let page = query.page()?;
    ok(state.transactions.list(&ctx, &wallet_id, None, page).await?)
}

/// Move value between two wallets of one user at the tier's rate
#[utoipa::path(
    post,
    path = "/api/v1/backoffice/wallets/{id}/transactions/exchange",
    params(("id" = String, Path, description = "Source wallet id, must equal fromWalletId")),
    request_body = ExchangeRequest,
    responses(
        (status = 200, description = "Both legs committed", body = ExchangeResult),
        (status = 404, description = "Wallet, user, tier or rate not found", body = ErrorResponse),
        (status = 406, description = "Insufficient balance", body = ErrorResponse),
        (status = 422, description = "Amount converts to nothing", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Transactions"
)]
pub async fn exchange(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    JsonBody(req): JsonBody<ExchangeRequest>,
) -> ApiResult<ExchangeResult> {
    if req.from_wallet_id != wallet_id {
        return Err(LedgerError::invalid_field("fromWalletId", "must match the wallet in the path").into());
    }
    let outcome = state.exchange.exchange(&ctx, req).await?;
    ok(outcome.into())
}

// ============================================================================
// Integrity
// ============================================================================

/// Compare the balance total with the transaction log total
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/wallets/{id}/check-integrity",
    params(("id" = String, Path, description = "Wallet id")),
    responses((status = 200, description = "Integrity report", body = IntegrityReport)),
    security(("bearer_jwt" = [])),
    tag = "Integrity"
)]
pub async fn check_integrity(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
) -> ApiResult<IntegrityReport> {
    ok(state.integrity.check_wallet_integrity(&ctx, &wallet_id).await?)
}
