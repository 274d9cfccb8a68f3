use crate::{
    accounts::AccountStore, auth::AuthService, store::Deadline, tokens::TokenService,
};
use std::{sync::Arc, time::Duration};

/// Budget for the readiness ping.
pub const READY_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared handler state, injected as an `Extension<Arc<AppState>>`.
#[derive(Clone)]
pub struct AppState {
    auth: AuthService,
    tokens: TokenService,
    accounts: Arc<dyn AccountStore>,
    request_timeout: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("auth", &self.auth)
            .field("tokens", &self.tokens)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(
        auth: AuthService,
        tokens: TokenService,
        accounts: Arc<dyn AccountStore>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            tokens,
            accounts,
            request_timeout,
        }
    }

    #[must_use]
    pub const fn auth(&self) -> &AuthService {
        &self.auth
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    /// Deadline for the store calls of one request.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}
