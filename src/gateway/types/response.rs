//! API response envelope and error mapping
//!
//! - `ApiResponse<T>`: `{success: true, data}`
//! - `ApiError`: `{success: false, error: {code, message, httpCode, reason?, fields?}}`

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{FieldErrors, LedgerError};

// ============================================================================
// Success envelope
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = true)]
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Success response with its status code
#[derive(Debug)]
pub struct ApiSuccess<T> {
    status: StatusCode,
    body: ApiResponse<T>,
}

impl<T: Serialize> IntoResponse for ApiSuccess<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiSuccess<T>, ApiError>;

/// 200 with `data`
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(ApiSuccess {
        status: StatusCode::OK,
        body: ApiResponse::success(data),
    })
}

/// 201 with `data`
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok(ApiSuccess {
        status: StatusCode::CREATED,
        body: ApiResponse::success(data),
    })
}

/// 202 with `data`
pub fn accepted<T>(data: T) -> ApiResult<T> {
    Ok(ApiSuccess {
        status: StatusCode::ACCEPTED,
        body: ApiResponse::success(data),
    })
}

// ============================================================================
// Error envelope
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[schema(example = "NOT_FOUND")]
    pub code: &'static str,
    pub message: String,
    #[schema(example = 404)]
    pub http_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub fields: Option<FieldErrors>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = false)]
    pub success: bool,
    pub error: ErrorBody,
}

/// Error returned by handlers and middleware
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(LedgerError::Unauthorized(message.into()))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(LedgerError::Forbidden(message.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(LedgerError::BadRequest(message.into()))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self(LedgerError::ServiceUnavailable(message.into()))
    }

    pub fn into_err<T>(self) -> Result<T, Self> {
        Err(self)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn body(&self) -> ErrorResponse {
        let err = &self.0;
        // Internal causes stay in the logs
        let message = if err.is_server_fault() {
            match err {
                LedgerError::ServiceUnavailable(_)
                | LedgerError::Deadlock(_)
                | LedgerError::SerializationFailure(_) => "service temporarily unavailable".to_string(),
                _ => "internal error".to_string(),
            }
        } else {
            err.to_string()
        };
        ErrorResponse {
            success: false,
            error: ErrorBody {
                code: err.code(),
                message,
                http_code: err.http_status(),
                reason: err.reason(),
                fields: err.fields().cloned(),
            },
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_fault() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
