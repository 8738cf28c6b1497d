//! Backoffice CRUD for governed reference data
//!
//! Reads and deletes are generic over the entity; creates and updates are
//! generated per entity because their payloads differ. Every write carries
//! the caller as its audit actor and the optional `x-audit-remarks` header
//! as remarks.

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::super::state::AppState;
use super::super::types::{ApiResult, JsonBody, PageQuery, accepted, created, ok};
use crate::audit::AuditContext;
use crate::context::RequestContext;
use crate::reference::Governed;
use crate::reference::admin::{
    NewExchangeRate, NewProgram, NewTier, NewTrigger, NewUser, NewWallet, UpdateExchangeRate,
    UpdateProgram, UpdateTier, UpdateTrigger, UpdateUser, UpdateWallet,
};
use crate::reference::models::{ExchangeRate, Program, Tier, Trigger, User, Wallet};

pub const AUDIT_REMARKS_HEADER: &str = "x-audit-remarks";

pub fn audit_context(ctx: &RequestContext, headers: &HeaderMap) -> AuditContext {
    let remarks = headers
        .get(AUDIT_REMARKS_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    AuditContext::new(&ctx.actor).with_remarks(remarks)
}

pub async fn list_records<T>(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<T>>
where
    T: Governed + Send + Sync + 'static,
{
    let page = query.page()?;
    ok(state.admin.list::<T>(&ctx, page).await?)
}

pub async fn get_record<T>(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<T>
where
    T: Governed + Send + Sync + 'static,
{
    ok(state.admin.get::<T>(&ctx, &id).await?)
}

pub async fn delete_record<T>(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<()>
where
    T: Governed + Send + Sync + 'static,
{
    let audit = audit_context(&ctx, &headers);
    state.admin.remove::<T>(&ctx, &audit, &id).await?;
    accepted(())
}

macro_rules! governed_writes {
    ($create:ident, $update:ident, $ty:ty, $new:ty, $upd:ty, $admin_create:ident, $admin_update:ident) => {
        pub async fn $create(
            State(state): State<Arc<AppState>>,
            Extension(ctx): Extension<RequestContext>,
            headers: HeaderMap,
            JsonBody(input): JsonBody<$new>,
        ) -> ApiResult<$ty> {
            let audit = audit_context(&ctx, &headers);
            created(state.admin.$admin_create(&ctx, &audit, input).await?)
        }

        pub async fn $update(
            State(state): State<Arc<AppState>>,
            Extension(ctx): Extension<RequestContext>,
            headers: HeaderMap,
            Path(id): Path<String>,
            JsonBody(input): JsonBody<$upd>,
        ) -> ApiResult<$ty> {
            let audit = audit_context(&ctx, &headers);
            ok(state.admin.$admin_update(&ctx, &audit, &id, input).await?)
        }
    };
}

governed_writes!(create_wallet, update_wallet, Wallet, NewWallet, UpdateWallet, create_wallet, update_wallet);
governed_writes!(create_tier, update_tier, Tier, NewTier, UpdateTier, create_tier, update_tier);
governed_writes!(create_user, update_user, User, NewUser, UpdateUser, create_user, update_user);
governed_writes!(
    create_exchange_rate,
    update_exchange_rate,
    ExchangeRate,
    NewExchangeRate,
    UpdateExchangeRate,
    create_exchange_rate,
    update_exchange_rate
);
governed_writes!(create_trigger, update_trigger, Trigger, NewTrigger, UpdateTrigger, create_trigger, update_trigger);
governed_writes!(create_program, update_program, Program, NewProgram, UpdateProgram, create_program, update_program);
