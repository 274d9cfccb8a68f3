//! User accounts and the store seam the authentication service drives.
//!
//! Each mutating method maps to exactly one conditional statement so that two
//! requests for the same account never interleave inside an operation.

mod memory;
mod postgres;

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;

use crate::store::{Deadline, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Locked,
    Disabled,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            "disabled" => Ok(Self::Disabled),
            other => Err(StoreError::Corrupt(format!("unknown account status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub password_hash: Option<String>,
    pub password_algo: Option<String>,
    pub password_updated_at: Option<DateTime<Utc>>,
    pub must_reset_password: bool,
    pub status: AccountStatus,
    pub login_failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub user_type: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Whether a lock is in place whose window has already passed.
    #[must_use]
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Locked && self.locked_until.is_some_and(|until| until < now)
    }

    #[must_use]
    pub fn view(&self) -> MinimalAuthView {
        MinimalAuthView {
            id: self.id,
            user_type: self.user_type.clone(),
            version: self.version,
            email: self.email.clone(),
            email_verified: self.email_verified,
        }
    }
}

/// The projection needed to hydrate token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MinimalAuthView {
    pub id: i64,
    pub user_type: Option<String>,
    pub version: i64,
    pub email: Option<String>,
    pub email_verified: bool,
}

/// Insert payload for signup. The email is expected to be normalized already.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: String,
    pub password_algo: String,
    pub user_type: Option<String>,
    pub must_reset_password: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Case-insensitive email lookup.
    async fn find_by_email(
        &self,
        email: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_by_username(
        &self,
        username: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: i64, deadline: Deadline) -> Result<Option<Account>, StoreError>;

    async fn minimal_view(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<MinimalAuthView>, StoreError>;

    /// Add one to the failure counter and return the new value, `None` if the
    /// account no longer exists.
    async fn increment_failed_attempts(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<i32>, StoreError>;

    /// Move an `active` account whose counter is at least `threshold` to `locked`.
    /// Returns whether the transition happened.
    async fn lock_if_threshold(
        &self,
        id: i64,
        threshold: i32,
        locked_until: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError>;

    /// Move a `locked` account whose `locked_until` is before `now` back to `active`.
    /// Returns whether the transition happened.
    async fn unlock_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError>;

    /// Zero the counter, stamp `last_login_at` and clear `locked_until`.
    async fn reset_after_success(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError>;

    /// Set a new password chosen by the user. Clears `must_reset_password` and
    /// bumps `version`.
    async fn update_password(
        &self,
        id: i64,
        hash: &str,
        algo: &str,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError>;

    /// Swap `current_hash` for a re-encoded hash of the same password. Matches
    /// nothing once the stored hash has changed, and leaves `version` alone.
    async fn rehash_password(
        &self,
        id: i64,
        current_hash: &str,
        hash: &str,
        algo: &str,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError>;

    /// Increment `version` and return the new value.
    async fn bump_version(&self, id: i64, deadline: Deadline) -> Result<Option<i64>, StoreError>;

    /// Insert a new active account at version 1 and return its id.
    /// Fails with `StoreError::Conflict` for a duplicate username or email.
    async fn create(
        &self,
        account: &NewAccount,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<i64, StoreError>;

    async fn deactivate(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError>;

    async fn reactivate(&self, id: i64, deadline: Deadline) -> Result<bool, StoreError>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError>;
}
