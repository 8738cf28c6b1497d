//! Gateway middleware
//!
//! - [`track_request`]: request id, request span, in-flight counter
//! - [`require_backoffice`] / [`require_user`]: bearer JWT to [`RequestContext`]

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::state::AppState;
use super::types::ApiError;
use crate::context::{Actor, ActorType, RequestContext};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id for `USER` tokens, operator id otherwise
    pub sub: String,
    pub actor_type: ActorType,
    pub exp: usize,
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        ApiError::unauthorized("Invalid or expired token")
    })
}

fn request_id_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| ulid::Ulid::new().to_string())
}

/// Outermost layer: assigns the request id, opens the request span and
/// counts the request as in flight until the response is produced.
pub async fn track_request(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let _guard = state.track();

    let request_id = request_id_of(&request);
    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn authenticate(state: &AppState, request: &Request<Body>, required: ActorType) -> Result<RequestContext, ApiError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid token format"))?;

    let claims = verify_token(&state.jwt_secret, token)?;
    if claims.actor_type != required {
        return Err(ApiError::forbidden(format!(
            "{} token cannot access {} routes",
            claims.actor_type, required
        )));
    }

    let actor = match claims.actor_type {
        ActorType::User => Actor::user(claims.sub),
        ActorType::Backoffice => Actor::backoffice(claims.sub),
        ActorType::System => Actor::system(),
    };
    let ctx = RequestContext::new(request_id_of(request), actor, state.request_timeout);
    tracing::debug!(
        request_id = %ctx.request_id,
        actor = %ctx.actor.actor_type,
        actor_id = ctx.actor.actor_id.as_deref().unwrap_or("-"),
        "Actor authenticated"
    );
    Ok(ctx)
}

pub async fn require_backoffice(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&state, &request, ActorType::Backoffice)?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&state, &request, ActorType::User)?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
