//! Password authentication with failure counting and time-boxed lockout.

mod service;

pub use service::{AuthService, Signup};

use crate::{credentials::HashError, store::StoreError};
use chrono::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_FAILED_LOGINS: i32 = 6;
pub const DEFAULT_LOCK_MINUTES: i64 = 15;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown identifier, wrong password or no password set. Deliberately one
    /// variant so callers cannot tell them apart.
    #[error("invalid credentials")]
    BadCredentials,
    #[error("account locked")]
    Locked,
    #[error("account disabled")]
    Disabled,
    #[error("password reset required")]
    MustResetPassword,
    #[error("invalid signup: {0}")]
    InvalidSignup(String),
    #[error("account already exists")]
    Conflict,
    #[error("authentication infrastructure failure: {0}")]
    Infra(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Infra(err.to_string())
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        Self::Infra(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_failed: i32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    #[must_use]
    pub const fn new(max_failed: i32, lock_minutes: i64) -> Self {
        Self {
            max_failed,
            lock_duration: Duration::minutes(lock_minutes),
        }
    }

    #[must_use]
    pub const fn max_failed(&self) -> i32 {
        self.max_failed
    }

    #[must_use]
    pub const fn lock_duration(&self) -> Duration {
        self.lock_duration
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILED_LOGINS, DEFAULT_LOCK_MINUTES)
    }
}

#[cfg(test)]
mod tests;
