use crate::{api::state::AppState, tokens::Jwks};
use axum::{Json, extract::Extension, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// OpenID Provider metadata.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub grant_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl ProviderMetadata {
    #[must_use]
    pub fn for_issuer(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            jwks_uri: format!("{issuer}/jwks.json"),
            token_endpoint: format!("{issuer}/token"),
            userinfo_endpoint: format!("{issuer}/userinfo"),
            revocation_endpoint: format!("{issuer}/revoke"),
            introspection_endpoint: format!("{issuer}/introspect"),
            grant_types_supported: vec!["password".to_string(), "refresh_token".to_string()],
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
        }
    }
}

#[utoipa::path(
    get,
    path= "/.well-known/openid-configuration",
    responses (
        (status = 200, description = "OpenID Provider metadata", body = ProviderMetadata),
    ),
    tag= "oidc"
)]
pub async fn openid_configuration(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(ProviderMetadata::for_issuer(
        state.tokens().config().issuer(),
    ))
}

#[utoipa::path(
    get,
    path= "/jwks.json",
    responses (
        (status = 200, description = "JWKS public keys", body = Jwks),
    ),
    tag= "oidc"
)]
pub async fn jwks(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.tokens().keys().jwks().clone())
}
