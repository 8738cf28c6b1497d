//! Gateway types
//!
//! - [`request`]: request DTOs, `PageQuery`, the `JsonBody` extractor
//! - [`response`]: success and error envelopes

pub mod request;
pub mod response;

pub use request::{AppExchangeBody, CreateAccountBody, JsonBody, PageQuery, PostTransactionBody};
pub use response::{
    ApiError, ApiResponse, ApiResult, ApiSuccess, ErrorBody, ErrorResponse, accepted, created, ok,
};
