//! Ledger Error Types
//!
//! One taxonomy for every layer. Each variant maps to a stable client code
//! and an HTTP status; storage failures are classified by SQLSTATE so the
//! engines can tell retryable conflicts apart from real faults.

use std::collections::BTreeMap;

use thiserror::Error;

/// Field-level validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Client Errors ===
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: Option<FieldErrors>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Actor not authenticated: {0}")]
    Unauthorized(String),

    #[error("Actor not permitted: {0}")]
    Forbidden(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Version mismatch on account {account_id}: expected {expected}, found {actual}")]
    VersionMismatch {
        account_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    // === Deadline / availability ===
    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // === Retryable storage conditions (never expected to reach clients) ===
    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            fields: None,
        }
    }

    /// Validation error pinned to a single field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.clone()]);
        LedgerError::Validation {
            message,
            fields: Some(fields),
        }
    }

    /// Stable error code surfaced to clients
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::BadRequest(_) => "BAD_REQUEST",
            LedgerError::Unauthorized(_) => "UNAUTHORIZED",
            LedgerError::Forbidden(_) => "FORBIDDEN",
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::Conflict(_)
            | LedgerError::VersionMismatch { .. }
            | LedgerError::Duplicate(_) => "CONFLICT",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::Unprocessable(_) => "UNPROCESSABLE_ENTITY",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::ServiceUnavailable(_)
            | LedgerError::Deadlock(_)
            | LedgerError::SerializationFailure(_) => "SERVICE_UNAVAILABLE",
            LedgerError::Database(_) | LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation { .. } | LedgerError::BadRequest(_) => 400,
            LedgerError::Unauthorized(_) => 401,
            LedgerError::Forbidden(_) => 403,
            LedgerError::NotFound { .. } => 404,
            LedgerError::InsufficientBalance { .. } => 406,
            LedgerError::Timeout(_) => 408,
            LedgerError::Conflict(_)
            | LedgerError::VersionMismatch { .. }
            | LedgerError::Duplicate(_) => 409,
            LedgerError::Unprocessable(_) => 422,
            LedgerError::Database(_) | LedgerError::Internal(_) => 500,
            LedgerError::ServiceUnavailable(_)
            | LedgerError::Deadlock(_)
            | LedgerError::SerializationFailure(_) => 503,
        }
    }

    /// Short machine-readable reason, where one exists beyond the code.
    pub fn reason(&self) -> Option<String> {
        match self {
            LedgerError::VersionMismatch { .. } => Some("VERSION_MISMATCH".to_string()),
            LedgerError::Duplicate(_) => Some("DUPLICATE_KEY".to_string()),
            LedgerError::NotFound { entity, .. } => Some(format!("{}_NOT_FOUND", entity.to_uppercase())),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&FieldErrors> {
        match self {
            LedgerError::Validation { fields, .. } => fields.as_ref(),
            _ => None,
        }
    }

    #[inline]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, LedgerError::Deadlock(_))
    }

    #[inline]
    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, LedgerError::SerializationFailure(_))
    }

    /// Server-side faults get logged at error level; everything else is the caller's.
    pub fn is_server_fault(&self) -> bool {
        self.http_status() >= 500
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => LedgerError::Duplicate(db.message().to_string()),
                Some("40P01") => LedgerError::Deadlock(db.message().to_string()),
                Some("40001") => LedgerError::SerializationFailure(db.message().to_string()),
                Some("57014") => LedgerError::Timeout(db.message().to_string()),
                Some("23514") | Some("23503") => LedgerError::Conflict(db.message().to_string()),
                _ => LedgerError::Database(e.to_string()),
            },
            sqlx::Error::PoolTimedOut => {
                LedgerError::Timeout("connection pool acquisition timed out".to_string())
            }
            sqlx::Error::PoolClosed => LedgerError::ServiceUnavailable("pool closed".to_string()),
            _ => LedgerError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Internal(format!("JSON encoding failed: {}", e))
    }
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        LedgerError::Validation {
            message: "request validation failed".to_string(),
            fields: Some(fields),
        }
    }
}
