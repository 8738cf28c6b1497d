//! Request DTOs and the JSON body extractor

use axum::{
    Json,
    extract::{FromRequest, Request},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::response::ApiError;
use crate::context::ActorType;
use crate::error::LedgerError;
use crate::money::{Amount, Version};
use crate::store::Page;
use crate::transaction::{PostRequest, TransactionKind};

// ============================================================================
// JsonBody: JSON extraction with enveloped rejections
// ============================================================================

/// `Json<T>` whose rejections use the error envelope
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;
        Ok(JsonBody(value))
    }
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number, default 1
    pub page: Option<i64>,
    /// Page size, default 10, clamped to 100
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> Result<Page, ApiError> {
        Ok(Page::new(self.page, self.limit)?)
    }
}

// ============================================================================
// Bodies
// ============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountBody {
    #[validate(length(min = 1, message = "is required"))]
    #[schema(example = "u1")]
    pub user_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostTransactionBody {
    #[validate(length(min = 1, message = "is required"))]
    pub account_id: String,
    pub kind: TransactionKind,
    #[schema(value_type = i64, example = 500)]
    pub amount: Amount,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub reference: Option<String>,
    #[schema(value_type = Option<i64>)]
    pub expected_version: Option<Version>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

impl PostTransactionBody {
    pub fn into_request(self) -> Result<PostRequest, LedgerError> {
        self.validate()?;
        if self.metadata.as_ref().is_some_and(|m| !m.is_object()) {
            return Err(LedgerError::invalid_field("metadata", "must be an object"));
        }
        let mut req = PostRequest::new(self.account_id, self.kind, self.amount)
            .by(self.actor_type, self.actor_id);
        req.reference = self.reference;
        req.expected_version = self.expected_version;
        req.metadata = self.metadata;
        Ok(req)
    }
}

/// Exchange requested by the token's own user
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppExchangeBody {
    pub from_wallet_id: String,
    pub to_wallet_id: String,
    #[schema(value_type = i64, example = 100)]
    pub amount: Amount,
}
