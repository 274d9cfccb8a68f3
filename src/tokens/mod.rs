//! Token issuance and lifecycle: signing keys, JWT codec, refresh sessions and
//! the service that ties them together.

pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod refresh;
mod service;

pub use jwks::{Jwk, Jwks};
pub use jwt::{JwtError, TokenClaims};
pub use keys::KeyManager;
pub use refresh::{
    MemoryRefreshTokenStore, PgRefreshTokenStore, RefreshSession, RefreshTokenStore,
};
pub use service::{Introspection, TokenConfig, TokenService, TokenSet};

use crate::store::StoreError;
use thiserror::Error;

/// Access/ID token lifetime.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 900;
/// Refresh token lifetime (30 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The refresh grant is unknown, expired, already used or its account is gone.
    #[error("invalid grant")]
    InvalidGrant,
    #[error("invalid token")]
    InvalidToken(#[from] JwtError),
    #[error("token infrastructure failure: {0}")]
    Infra(String),
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        Self::Infra(err.to_string())
    }
}
