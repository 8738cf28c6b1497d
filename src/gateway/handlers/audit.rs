//! Audit trail and dead-letter queries

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, Query, State},
};

use super::super::state::AppState;
use super::super::types::{ApiResult, ErrorResponse, PageQuery, ok};
use crate::audit::Audit;
use crate::context::RequestContext;
use crate::dispatcher::DeadLetter;

/// All audit rows, newest first
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/audit",
    params(PageQuery),
    responses((status = 200, description = "Audit rows", body = Vec<Audit>)),
    security(("bearer_jwt" = [])),
    tag = "Audit"
)]
pub async fn list_audit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Audit>> {
    let page = query.page()?;
    ok(state.admin.list_audit(&ctx, page).await?)
}

/// History of one governed record, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/audit/record/{table}/{id}",
    params(
        ("table" = String, Path, description = "Governed table, e.g. `wallets`"),
        ("id" = String, Path, description = "Record id")
    ),
    responses(
        (status = 200, description = "Audit rows", body = Vec<Audit>),
        (status = 400, description = "Unknown table", body = ErrorResponse)
    ),
    security(("bearer_jwt" = [])),
    tag = "Audit"
)]
pub async fn audit_for_record(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Vec<Audit>> {
    ok(state.admin.audit_for_record(&ctx, &table, &id).await?)
}

/// Program events that exhausted their delivery attempts
#[utoipa::path(
    get,
    path = "/api/v1/backoffice/dead-letters",
    params(PageQuery),
    responses((status = 200, description = "Dead letters", body = Vec<DeadLetter>)),
    security(("bearer_jwt" = [])),
    tag = "Audit"
)]
pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<DeadLetter>> {
    let page = query.page()?;
    ok(state.admin.list_dead_letters(&ctx, page).await?)
}
