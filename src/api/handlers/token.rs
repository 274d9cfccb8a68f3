//! OAuth 2.0 token endpoint plus revocation (RFC 7009) and introspection (RFC 7662).

use super::error::{
    INVALID_GRANT, INVALID_REQUEST, SERVER_ERROR, UNSUPPORTED_GRANT_TYPE, error_response,
    no_store,
};
use crate::{
    api::state::AppState,
    auth::AuthError,
    tokens::{Introspection, TokenError, TokenSet},
};
use axum::{
    Json,
    extract::{Extension, Form, rejection::FormRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Default)]
pub struct TokenRequest {
    /// `password` or `refresh_token`.
    grant_type: Option<String>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenSet> for TokenResponse {
    fn from(set: TokenSet) -> Self {
        Self {
            access_token: set.access_token,
            id_token: set.id_token,
            refresh_token: set.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: set.expires_in,
        }
    }
}

/// Body of `/revoke` and `/introspect`.
#[derive(ToSchema, Deserialize, Default)]
pub struct TokenForm {
    token: Option<String>,
}

impl TokenForm {
    fn into_token(self) -> Option<String> {
        self.token.filter(|token| !token.trim().is_empty())
    }
}

#[utoipa::path(
    post,
    path= "/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Token set issued", body = TokenResponse),
        (status = 400, description = "Malformed request or unsupported grant type", body = super::error::ErrorBody),
        (status = 401, description = "Invalid credentials or refresh token", body = super::error::ErrorBody),
        (status = 500, description = "Token issuance failed", body = super::error::ErrorBody)
    ),
    tag = "oauth",
)]
#[instrument(skip(state, form))]
pub async fn token(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Ok(Form(request)) = form else {
        debug!("Failed to parse token request form");
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST);
    };

    let result = match request.grant_type.as_deref() {
        Some("password") => password_grant(&state, request).await,
        Some("refresh_token") => refresh_grant(&state, request).await,
        other => {
            debug!(grant_type = ?other, "unsupported grant type");
            Err(error_response(StatusCode::BAD_REQUEST, UNSUPPORTED_GRANT_TYPE))
        }
    };

    match result {
        Ok(set) => (StatusCode::OK, no_store(), Json(TokenResponse::from(set))).into_response(),
        Err(response) => response,
    }
}

async fn password_grant(state: &AppState, request: TokenRequest) -> Result<TokenSet, Response> {
    let (Some(username), Some(password), Some(client_id)) = (
        non_empty(request.username),
        request.password.filter(|p| !p.is_empty()),
        non_empty(request.client_id),
    ) else {
        return Err(error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST));
    };
    let password = SecretString::from(password);
    let deadline = state.deadline();

    let view = state
        .auth()
        .authenticate(&username, &password, deadline)
        .await
        .map_err(|err| match err {
            AuthError::Infra(reason) => {
                error!("Password grant failed: {reason}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
            }
            other => {
                debug!("Password grant rejected: {other}");
                error_response(StatusCode::UNAUTHORIZED, INVALID_GRANT)
            }
        })?;

    state
        .tokens()
        .issue_tokens(&view, &client_id, deadline)
        .await
        .map_err(|err| {
            error!("Failed to issue tokens: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
        })
}

async fn refresh_grant(state: &AppState, request: TokenRequest) -> Result<TokenSet, Response> {
    let Some(refresh_token) = non_empty(request.refresh_token) else {
        return Err(error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST));
    };

    state
        .tokens()
        .refresh(&refresh_token, state.deadline())
        .await
        .map_err(token_error_response)
}

#[utoipa::path(
    post,
    path= "/revoke",
    request_body(content = TokenForm, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Token revoked or already unknown"),
        (status = 400, description = "Missing token", body = super::error::ErrorBody)
    ),
    tag = "oauth",
)]
#[instrument(skip(state, form))]
pub async fn revoke(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Response {
    let Some(token) = form.ok().and_then(|Form(form)| form.into_token()) else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST);
    };

    state.tokens().revoke(&token, state.deadline()).await;
    (StatusCode::OK, no_store()).into_response()
}

#[utoipa::path(
    post,
    path= "/introspect",
    request_body(content = TokenForm, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Token state", body = Introspection),
        (status = 400, description = "Missing token", body = super::error::ErrorBody),
        (status = 500, description = "Token store unavailable", body = super::error::ErrorBody)
    ),
    tag = "oauth",
)]
#[instrument(skip(state, form))]
pub async fn introspect(
    Extension(state): Extension<Arc<AppState>>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Response {
    let Some(token) = form.ok().and_then(|Form(form)| form.into_token()) else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST);
    };

    match state.tokens().introspect(&token, state.deadline()).await {
        Ok(introspection) => (StatusCode::OK, no_store(), Json(introspection)).into_response(),
        Err(err) => token_error_response(err),
    }
}

fn token_error_response(err: TokenError) -> Response {
    match err {
        TokenError::InvalidGrant | TokenError::InvalidToken(_) => {
            debug!("Refresh grant rejected: {err}");
            error_response(StatusCode::UNAUTHORIZED, INVALID_GRANT)
        }
        TokenError::Infra(reason) => {
            error!("Token store failure: {reason}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR)
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
