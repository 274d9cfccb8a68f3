//! Account signup and direct password login.

use super::error::ErrorBody;
use crate::{
    accounts::MinimalAuthView,
    api::state::AppState,
    auth::{AuthError, Signup},
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct SignupRequest {
    username: Option<String>,
    email: Option<String>,
    password: String,
    user_type: Option<String>,
    #[serde(default)]
    must_reset: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignupResponse {
    pub id: i64,
}

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    /// Email (contains `@`) or username.
    identifier: String,
    password: String,
}

#[utoipa::path(
    post,
    path= "/v1/auth/signup",
    request_body = SignupRequest,
    responses (
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Invalid signup input", body = ErrorBody),
        (status = 409, description = "Username or email already taken", body = ErrorBody),
        (status = 500, description = "Account store failure", body = ErrorBody)
    ),
    tag = "auth",
)]
#[instrument(skip(state, payload))]
pub async fn signup(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        debug!("Failed to parse signup payload");
        return json_error(StatusCode::BAD_REQUEST, "invalid_request");
    };

    let signup = Signup {
        username: request.username,
        email: request.email,
        password: SecretString::from(request.password),
        user_type: request.user_type,
        must_reset_password: request.must_reset,
    };

    match state.auth().signup(signup, state.deadline()).await {
        Ok(id) => (StatusCode::CREATED, Json(SignupResponse { id })).into_response(),
        Err(AuthError::InvalidSignup(reason)) => {
            debug!("Rejected signup: {reason}");
            json_error(StatusCode::BAD_REQUEST, "invalid_request")
        }
        Err(AuthError::Conflict) => json_error(StatusCode::CONFLICT, "conflict"),
        Err(err) => {
            error!("Signup failed: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error")
        }
    }
}

#[utoipa::path(
    post,
    path= "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Credentials accepted", body = MinimalAuthView),
        (status = 401, description = "Invalid credentials or password reset required", body = ErrorBody),
        (status = 403, description = "Account locked or disabled", body = ErrorBody),
        (status = 500, description = "Account store failure", body = ErrorBody)
    ),
    tag = "auth",
)]
#[instrument(skip(state, payload))]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = payload else {
        debug!("Failed to parse login payload");
        return json_error(StatusCode::BAD_REQUEST, "invalid_request");
    };
    let password = SecretString::from(request.password);

    match state
        .auth()
        .authenticate(&request.identifier, &password, state.deadline())
        .await
    {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => login_error_response(&err),
    }
}

fn login_error_response(err: &AuthError) -> Response {
    match err {
        AuthError::BadCredentials => json_error(StatusCode::UNAUTHORIZED, "invalid_credentials"),
        AuthError::MustResetPassword => {
            json_error(StatusCode::UNAUTHORIZED, "password_reset_required")
        }
        AuthError::Locked => json_error(StatusCode::FORBIDDEN, "account_locked"),
        AuthError::Disabled => json_error(StatusCode::FORBIDDEN, "account_disabled"),
        AuthError::InvalidSignup(_) | AuthError::Conflict | AuthError::Infra(_) => {
            error!("Login failed: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error")
        }
    }
}

fn json_error(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
        }),
    )
        .into_response()
}
