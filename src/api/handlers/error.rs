//! JSON error bodies shared by the handlers.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OAuth 2.0 style error body: `{"error": "<code>"}`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

pub const INVALID_REQUEST: &str = "invalid_request";
pub const INVALID_GRANT: &str = "invalid_grant";
pub const INVALID_TOKEN: &str = "invalid_token";
pub const UNSUPPORTED_GRANT_TYPE: &str = "unsupported_grant_type";
pub const SERVER_ERROR: &str = "server_error";

pub fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        no_store(),
        Json(ErrorBody {
            error: code.to_string(),
        }),
    )
        .into_response()
}

/// Headers for responses that carry credentials.
pub fn no_store() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers
}
