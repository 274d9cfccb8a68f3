use super::{
    DEFAULT_ACCESS_TOKEN_TTL_SECONDS, DEFAULT_REFRESH_TOKEN_TTL_SECONDS, KeyManager,
    RefreshSession, RefreshTokenStore, TokenClaims, TokenError, refresh::generate_refresh_token,
};
use crate::{
    accounts::{AccountStore, MinimalAuthView},
    clock::Clock,
    store::Deadline,
};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone)]
pub struct TokenConfig {
    issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub const fn with_access_token_ttl_seconds(mut self, ttl: i64) -> Self {
        self.access_token_ttl_seconds = ttl;
        self
    }

    #[must_use]
    pub const fn with_refresh_token_ttl_seconds(mut self, ttl: i64) -> Self {
        self.refresh_token_ttl_seconds = ttl;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub const fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }
}

/// Result of a successful grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// RFC 7662 style introspection result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl Introspection {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    fn refresh(session: &RefreshSession) -> Self {
        Self {
            active: true,
            client_id: Some(session.client_id.clone()),
            sub: Some(session.account_id.to_string()),
            exp: Some(session.expires_at.timestamp()),
            token_type: Some("refresh_token".to_string()),
            ..Self::default()
        }
    }

    fn access(claims: TokenClaims) -> Self {
        Self {
            active: true,
            sub: Some(claims.sub),
            aud: Some(claims.aud),
            iss: Some(claims.iss),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            token_type: Some("access_token".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    keys: Arc<KeyManager>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("config", &self.config)
            .field("kid", &self.keys.kid())
            .finish_non_exhaustive()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(
        config: TokenConfig,
        keys: Arc<KeyManager>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            keys,
            refresh_tokens,
            accounts,
            clock,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TokenConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Sign an ID/access token pair for `view` and persist a new refresh session.
    ///
    /// # Errors
    /// Returns `TokenError::Infra` if signing, randomness or the store fails.
    pub async fn issue_tokens(
        &self,
        view: &MinimalAuthView,
        audience: &str,
        deadline: Deadline,
    ) -> Result<TokenSet, TokenError> {
        let now = self.clock.now();
        let ttl = self.config.access_token_ttl_seconds;
        let iat = now.timestamp();

        let access_claims = TokenClaims {
            iss: self.config.issuer.clone(),
            sub: view.id.to_string(),
            aud: audience.to_string(),
            exp: iat + ttl,
            iat,
            v: view.version,
            user_type: view.user_type.clone(),
            email: None,
            email_verified: None,
        };
        let id_claims = TokenClaims {
            email: view.email.clone(),
            email_verified: Some(view.email_verified),
            ..access_claims.clone()
        };

        let id_token = self
            .keys
            .sign(&id_claims)
            .map_err(|err| TokenError::Infra(format!("failed to sign id token: {err}")))?;
        let access_token = self
            .keys
            .sign(&access_claims)
            .map_err(|err| TokenError::Infra(format!("failed to sign access token: {err}")))?;

        let refresh_token = generate_refresh_token()
            .map_err(|err| TokenError::Infra(format!("failed to generate refresh token: {err}")))?;
        let session = RefreshSession {
            account_id: view.id,
            client_id: audience.to_string(),
            expires_at: now + Duration::seconds(self.config.refresh_token_ttl_seconds),
        };
        self.refresh_tokens
            .insert(&refresh_token, &session, deadline)
            .await?;

        debug!(sub = view.id, client_id = audience, "issued token set");

        Ok(TokenSet {
            id_token,
            access_token,
            refresh_token,
            expires_in: ttl,
        })
    }

    /// Return the session for a live refresh token, `None` when it is unknown
    /// or expired. Never deletes anything.
    ///
    /// # Errors
    /// Returns `TokenError::Infra` if the store fails.
    pub async fn validate_refresh_token(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<Option<RefreshSession>, TokenError> {
        let session = self.refresh_tokens.get(token, deadline).await?;
        let now = self.clock.now();
        Ok(session.filter(|session| !session.is_expired(now)))
    }

    /// Delete a refresh token. Unknown tokens are not an error.
    ///
    /// # Errors
    /// Returns `TokenError::Infra` if the store fails.
    pub async fn revoke_refresh_token(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<(), TokenError> {
        let removed = self.refresh_tokens.delete(token, deadline).await?;
        debug!(removed, "refresh token revocation");
        Ok(())
    }

    /// Best-effort revocation for the public endpoint; failures are only logged.
    pub async fn revoke(&self, token: &str, deadline: Deadline) {
        if let Err(err) = self.revoke_refresh_token(token, deadline).await {
            warn!("refresh token revocation failed: {err}");
        }
    }

    /// Delete every refresh session of an account.
    ///
    /// # Errors
    /// Returns `TokenError::Infra` if the store fails.
    pub async fn revoke_all_for_account(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<u64, TokenError> {
        let removed = self
            .refresh_tokens
            .delete_for_account(account_id, deadline)
            .await?;
        debug!(account_id, removed, "revoked all refresh sessions");
        Ok(removed)
    }

    /// Rotate a refresh token: validate, consume, then issue a new set. The old
    /// token is gone before the new one exists, and when two callers race only
    /// the one whose delete removed the row proceeds.
    ///
    /// # Errors
    /// `TokenError::InvalidGrant` when the token is unknown, expired, already
    /// consumed or its account is gone; `TokenError::Infra` on store failures.
    pub async fn refresh(&self, token: &str, deadline: Deadline) -> Result<TokenSet, TokenError> {
        let session = self
            .validate_refresh_token(token, deadline)
            .await?
            .ok_or(TokenError::InvalidGrant)?;

        let view = self
            .accounts
            .minimal_view(session.account_id, deadline)
            .await?
            .ok_or_else(|| {
                debug!(account_id = session.account_id, "refresh for missing account");
                TokenError::InvalidGrant
            })?;

        if !self.refresh_tokens.delete(token, deadline).await? {
            debug!(
                account_id = session.account_id,
                "refresh token already consumed"
            );
            return Err(TokenError::InvalidGrant);
        }

        self.issue_tokens(&view, &session.client_id, deadline)
            .await
            .inspect_err(|err| error!("failed to issue rotated tokens: {err}"))
    }

    /// Describe a token: a live refresh token first, then a JWT signed by this
    /// service. Anything else is inactive.
    ///
    /// # Errors
    /// Returns `TokenError::Infra` only when the refresh store fails.
    pub async fn introspect(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<Introspection, TokenError> {
        if let Some(session) = self.validate_refresh_token(token, deadline).await? {
            return Ok(Introspection::refresh(&session));
        }

        match self.verify_jwt(token) {
            Ok(claims) => Ok(Introspection::access(claims)),
            Err(err) => {
                debug!("introspected token inactive: {err}");
                Ok(Introspection::inactive())
            }
        }
    }

    /// Verify a JWT issued by this service: structure, RS256, known `kid`,
    /// signature and expiry.
    ///
    /// # Errors
    /// Returns `TokenError::InvalidToken` with the failing check.
    pub fn verify_jwt(&self, token: &str) -> Result<TokenClaims, TokenError> {
        Ok(self.keys.verify(token, self.clock.now().timestamp())?)
    }
}
