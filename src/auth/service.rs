use super::{AuthError, LockoutPolicy};
use crate::{
    accounts::{Account, AccountStatus, AccountStore, MinimalAuthView, NewAccount},
    clock::Clock,
    credentials::{HashedPassword, PasswordHasher},
    store::Deadline,
};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};
use tracing::{debug, error, info, warn};

/// Deadline for work that outlives the request, such as opportunistic rehashing.
const BACKGROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Signup input before normalization.
#[derive(Debug, Clone)]
pub struct Signup {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: SecretString,
    pub user_type: Option<String>,
    pub must_reset_password: bool,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    background_timeout: Duration,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            accounts,
            hasher,
            clock,
            policy,
            background_timeout: BACKGROUND_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_background_timeout(mut self, timeout: Duration) -> Self {
        self.background_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Check a password for `identifier` (email when it contains `@`, username
    /// otherwise) and return the claims projection on success.
    ///
    /// # Errors
    /// - `BadCredentials` for an unknown identifier, a wrong password or a missing hash.
    /// - `Locked` / `Disabled` for accounts in those states.
    /// - `MustResetPassword` after a correct password when a reset is pending.
    /// - `Infra` when the store fails on the success path.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &SecretString,
        deadline: Deadline,
    ) -> Result<MinimalAuthView, AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(AuthError::BadCredentials);
        }

        let Some(mut account) = self.lookup(identifier, deadline).await? else {
            debug!("login for unknown identifier");
            return Err(AuthError::BadCredentials);
        };

        let now = self.clock.now();
        if account.lock_expired(now) {
            match self.accounts.unlock_if_expired(account.id, now, deadline).await {
                Ok(true) => {
                    info!(account_id = account.id, "lock expired, account unlocked");
                    account.status = AccountStatus::Active;
                    account.locked_until = None;
                }
                Ok(false) => debug!(account_id = account.id, "expired lock already handled"),
                Err(err) => warn!(account_id = account.id, "failed to unlock account: {err}"),
            }
        }

        match account.status {
            AccountStatus::Locked => return Err(AuthError::Locked),
            AccountStatus::Disabled => return Err(AuthError::Disabled),
            AccountStatus::Active => {}
        }

        let Some(stored_hash) = account.password_hash.clone().filter(|h| !h.is_empty()) else {
            debug!(account_id = account.id, "account has no password");
            return Err(AuthError::BadCredentials);
        };

        if !self.verify(stored_hash.clone(), password.clone()).await? {
            self.record_failure(account.id, deadline).await;
            return Err(AuthError::BadCredentials);
        }

        self.accounts
            .reset_after_success(account.id, now, deadline)
            .await?;

        if account.must_reset_password {
            debug!(account_id = account.id, "password reset required");
            return Err(AuthError::MustResetPassword);
        }

        let view = self
            .accounts
            .minimal_view(account.id, deadline)
            .await?
            .ok_or(AuthError::BadCredentials)?;

        if self.hasher.needs_rehash(&stored_hash) {
            self.spawn_rehash(account.id, stored_hash, password.clone());
        }

        debug!(account_id = account.id, "password login succeeded");
        Ok(view)
    }

    /// Create an active account at version 1.
    ///
    /// # Errors
    /// `InvalidSignup` for bad input, `Conflict` for a taken username or email,
    /// `Infra` otherwise.
    pub async fn signup(&self, request: Signup, deadline: Deadline) -> Result<i64, AuthError> {
        let username = request
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let email = request
            .email
            .as_deref()
            .map(canonical_email)
            .filter(|e| !e.is_empty());

        if username.is_none() && email.is_none() {
            return Err(AuthError::InvalidSignup(
                "username or email required".to_string(),
            ));
        }
        if username.as_deref().is_some_and(|u| u.contains('@')) {
            return Err(AuthError::InvalidSignup(
                "username must not contain '@'".to_string(),
            ));
        }
        if email.as_deref().is_some_and(|e| !is_plausible_email(e)) {
            return Err(AuthError::InvalidSignup("invalid email".to_string()));
        }
        if request.password.expose_secret().is_empty() {
            return Err(AuthError::InvalidSignup("password required".to_string()));
        }

        let hashed = self.hash(request.password).await?;
        let account = NewAccount {
            username,
            email,
            password_hash: hashed.hash,
            password_algo: hashed.algo,
            user_type: request
                .user_type
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            must_reset_password: request.must_reset_password,
        };

        match self
            .accounts
            .create(&account, self.clock.now(), deadline)
            .await
        {
            Ok(id) => {
                info!(account_id = id, "account created");
                Ok(id)
            }
            Err(crate::store::StoreError::Conflict) => Err(AuthError::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    /// Set a new password. Bumps the version, which invalidates every token
    /// issued before, and clears a pending reset.
    ///
    /// # Errors
    /// `BadCredentials` if the account does not exist, `Infra` otherwise.
    pub async fn change_password(
        &self,
        account_id: i64,
        new_password: SecretString,
        deadline: Deadline,
    ) -> Result<(), AuthError> {
        if self.accounts.find_by_id(account_id, deadline).await?.is_none() {
            return Err(AuthError::BadCredentials);
        }
        let hashed = self.hash(new_password).await?;
        self.accounts
            .update_password(account_id, &hashed.hash, &hashed.algo, self.clock.now(), deadline)
            .await?;
        info!(account_id, "password changed");
        Ok(())
    }

    /// Explicit invalidation: bump the version and return the new value.
    ///
    /// # Errors
    /// `BadCredentials` if the account does not exist, `Infra` otherwise.
    pub async fn invalidate_tokens(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<i64, AuthError> {
        let version = self
            .accounts
            .bump_version(account_id, deadline)
            .await?
            .ok_or(AuthError::BadCredentials)?;
        info!(account_id, version, "tokens invalidated");
        Ok(version)
    }

    /// Disable an account and invalidate its tokens.
    ///
    /// # Errors
    /// `BadCredentials` if the account does not exist, `Infra` otherwise.
    pub async fn deactivate(&self, account_id: i64, deadline: Deadline) -> Result<(), AuthError> {
        if !self
            .accounts
            .deactivate(account_id, self.clock.now(), deadline)
            .await?
        {
            return Err(AuthError::BadCredentials);
        }
        self.invalidate_tokens(account_id, deadline).await?;
        Ok(())
    }

    /// Return a disabled account to `active`. Returns whether it was disabled.
    ///
    /// # Errors
    /// Returns `Infra` if the store fails.
    pub async fn reactivate(&self, account_id: i64, deadline: Deadline) -> Result<bool, AuthError> {
        Ok(self.accounts.reactivate(account_id, deadline).await?)
    }

    async fn lookup(
        &self,
        identifier: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, AuthError> {
        let account = if identifier.contains('@') {
            self.accounts
                .find_by_email(&canonical_email(identifier), deadline)
                .await
        } else {
            self.accounts.find_by_username(identifier, deadline).await
        };
        account.map_err(|err| {
            error!("account lookup failed: {err}");
            AuthError::from(err)
        })
    }

    /// Increment, then try to lock. Both are atomic in the store; errors are
    /// logged because the caller answers `BadCredentials` either way.
    async fn record_failure(&self, account_id: i64, deadline: Deadline) {
        let attempts = match self
            .accounts
            .increment_failed_attempts(account_id, deadline)
            .await
        {
            Ok(Some(attempts)) => attempts,
            Ok(None) => return,
            Err(err) => {
                error!(account_id, "failed to record login failure: {err}");
                return;
            }
        };
        debug!(account_id, attempts, "password mismatch");

        let locked_until = self.clock.now() + self.policy.lock_duration();
        match self
            .accounts
            .lock_if_threshold(account_id, self.policy.max_failed(), locked_until, deadline)
            .await
        {
            Ok(true) => warn!(account_id, %locked_until, "account locked after failed logins"),
            Ok(false) => {}
            Err(err) => error!(account_id, "failed to lock account: {err}"),
        }
    }

    async fn verify(&self, stored_hash: String, password: SecretString) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&stored_hash, &password))
            .await
            .map_err(|err| AuthError::Infra(format!("password verification task failed: {err}")))
    }

    async fn hash(&self, password: SecretString) -> Result<HashedPassword, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| AuthError::Infra(format!("password hashing task failed: {err}")))??;
        Ok(hashed)
    }

    /// Upgrade an outdated hash in the background without bumping the version.
    /// The write only lands while `stored_hash` is still the current hash.
    fn spawn_rehash(&self, account_id: i64, stored_hash: String, password: SecretString) {
        let service = self.clone();
        tokio::spawn(async move {
            let deadline = Deadline::after(service.background_timeout);
            let hashed = match service.hash(password).await {
                Ok(hashed) => hashed,
                Err(err) => {
                    warn!(account_id, "rehash failed: {err}");
                    return;
                }
            };
            match service
                .accounts
                .rehash_password(
                    account_id,
                    &stored_hash,
                    &hashed.hash,
                    &hashed.algo,
                    service.clock.now(),
                    deadline,
                )
                .await
            {
                Ok(true) => debug!(account_id, algo = %hashed.algo, "password rehashed"),
                Ok(false) => debug!(account_id, "password changed meanwhile, rehash dropped"),
                Err(err) => warn!(account_id, "failed to store rehashed password: {err}"),
            }
        });
    }
}

/// `local@domain.tld` with no whitespace and a single `@`.
static EMAIL_SHAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Lookup and uniqueness form of an email address.
fn canonical_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn is_plausible_email(canonical: &str) -> bool {
    EMAIL_SHAPE
        .as_ref()
        .is_some_and(|shape| shape.is_match(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_compiles_once_and_matches() {
        assert!(EMAIL_SHAPE.is_some());
        assert!(is_plausible_email(&canonical_email("  Bob@Example.COM ")));
        assert_eq!(canonical_email(" Bob@Example.COM "), "bob@example.com");
        for raw in ["bob", "bob@home", "bob smith@example.com", "@example.com", "a@@b.c"] {
            assert!(!is_plausible_email(&canonical_email(raw)), "{raw}");
        }
    }
}
