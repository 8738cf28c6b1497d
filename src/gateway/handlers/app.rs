//! User-facing handlers, always scoped to the token's user

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, AppExchangeBody, ErrorResponse, JsonBody, PageQuery, ok};
use crate::account::{Account, AccountLookup};
use crate::context::RequestContext;
use crate::exchange::{ExchangeRequest, ExchangeResult};
use crate::transaction::Transaction;

fn user_id(ctx: &RequestContext) -> Result<String, ApiError> {
    ctx.actor
        .actor_id
        .clone()
        .ok_or_else(|| ApiError::unauthorized("Token carries no user id"))
}

/// The caller's account in a wallet
#[utoipa::path(
    get,
    path = "/api/v1/app/wallets/{id}/account",
    params(("id" = String, Path, description = "Wallet id")),
    responses(
        (status = 200, description = "Account", body = Account),
        (status = 404, description = "No account in this wallet", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "App"
)]
pub async fn my_account(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
) -> ApiResult<Account> {
    let user_id = user_id(&ctx)?;
    ok(state
        .accounts
        .get_account(&ctx, &wallet_id, AccountLookup::ByUser(user_id))
        .await?)
}

/// The caller's transactions in a wallet, newest first
#[utoipa::path(
    get,
    path = "/api/v1/app/wallets/{id}/transactions",
    params(("id" = String, Path, description = "Wallet id"), PageQuery),
    responses((status = 200, description = "Transactions", body = Vec<Transaction>)),
    security(("bearer_jwt" = [])),
    tag = "App"
)]
pub async fn my_transactions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(wallet_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Transaction>> {
    let page = query.page()?;
    let user_id = user_id(&ctx)?;
    let account = state
        .accounts
        .get_account(&ctx, &wallet_id, AccountLookup::ByUser(user_id))
        .await?;
    ok(state
        .transactions
        .list(&ctx, &wallet_id, Some(&account.id), page)
        .await?)
}

/// Exchange between two of the caller's wallets
#[utoipa::path(
    post,
    path = "/api/v1/app/exchange",
    request_body = AppExchangeBody,
    responses(
        (status = 200, description = "Both legs committed", body = ExchangeResult),
        (status = 406, description = "Insufficient balance", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "App"
)]
pub async fn my_exchange(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    JsonBody(body): JsonBody<AppExchangeBody>,
) -> ApiResult<ExchangeResult> {
    let req = ExchangeRequest {
        from_wallet_id: body.from_wallet_id,
        to_wallet_id: body.to_wallet_id,
        user_id: user_id(&ctx)?,
        amount: body.amount,
    };
    let outcome = state.exchange.exchange(&ctx, req).await?;
    ok(outcome.into())
}
