use super::{Account, AccountStatus, AccountStore, MinimalAuthView, NewAccount};
use crate::store::{Deadline, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// In-process account store. Every method holds the lock for its whole body,
/// which gives the same atomicity as one SQL statement.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    accounts: BTreeMap<i64, Account>,
}

impl State {
    fn email_taken(&self, email: &str) -> bool {
        self.accounts.values().any(|account| {
            account
                .email
                .as_deref()
                .is_some_and(|current| current.eq_ignore_ascii_case(email))
        })
    }

    fn username_taken(&self, username: &str) -> bool {
        self.accounts
            .values()
            .any(|account| account.username.as_deref() == Some(username))
    }
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored row, used to assert on security state.
    pub async fn snapshot(&self, id: i64) -> Option<Account> {
        self.state.lock().await.accounts.get(&id).cloned()
    }

    /// Overwrite a stored row, bypassing all invariants.
    pub async fn put(&self, account: Account) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(account.id);
        state.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_email(
        &self,
        email: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError> {
        deadline
            .run(async {
                let state = self.state.lock().await;
                Ok(state
                    .accounts
                    .values()
                    .find(|account| {
                        account
                            .email
                            .as_deref()
                            .is_some_and(|current| current.eq_ignore_ascii_case(email))
                    })
                    .cloned())
            })
            .await
    }

    async fn find_by_username(
        &self,
        username: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError> {
        deadline
            .run(async {
                let state = self.state.lock().await;
                Ok(state
                    .accounts
                    .values()
                    .find(|account| account.username.as_deref() == Some(username))
                    .cloned())
            })
            .await
    }

    async fn find_by_id(&self, id: i64, deadline: Deadline) -> Result<Option<Account>, StoreError> {
        deadline
            .run(async { Ok(self.state.lock().await.accounts.get(&id).cloned()) })
            .await
    }

    async fn minimal_view(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<MinimalAuthView>, StoreError> {
        deadline
            .run(async { Ok(self.state.lock().await.accounts.get(&id).map(Account::view)) })
            .await
    }

    async fn increment_failed_attempts(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<i32>, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                Ok(state.accounts.get_mut(&id).map(|account| {
                    account.login_failed_attempts =
                        account.login_failed_attempts.saturating_add(1);
                    account.updated_at = Utc::now();
                    account.login_failed_attempts
                }))
            })
            .await
    }

    async fn lock_if_threshold(
        &self,
        id: i64,
        threshold: i32,
        locked_until: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                let Some(account) = state.accounts.get_mut(&id) else {
                    return Ok(false);
                };
                if account.status != AccountStatus::Active
                    || account.login_failed_attempts < threshold
                {
                    return Ok(false);
                }
                account.status = AccountStatus::Locked;
                account.locked_until = Some(locked_until);
                account.updated_at = Utc::now();
                Ok(true)
            })
            .await
    }

    async fn unlock_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                let Some(account) = state.accounts.get_mut(&id) else {
                    return Ok(false);
                };
                if !account.lock_expired(now) {
                    return Ok(false);
                }
                account.status = AccountStatus::Active;
                account.locked_until = None;
                account.updated_at = now;
                Ok(true)
            })
            .await
    }

    async fn reset_after_success(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                if let Some(account) = state.accounts.get_mut(&id) {
                    account.login_failed_attempts = 0;
                    account.last_login_at = Some(now);
                    account.locked_until = None;
                    account.updated_at = now;
                }
                Ok(())
            })
            .await
    }

    async fn update_password(
        &self,
        id: i64,
        hash: &str,
        algo: &str,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                if let Some(account) = state.accounts.get_mut(&id) {
                    account.password_hash = Some(hash.to_string());
                    account.password_algo = Some(algo.to_string());
                    account.password_updated_at = Some(now);
                    account.must_reset_password = false;
                    account.version += 1;
                    account.updated_at = now;
                }
                Ok(())
            })
            .await
    }

    async fn rehash_password(
        &self,
        id: i64,
        current_hash: &str,
        hash: &str,
        algo: &str,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                let Some(account) = state.accounts.get_mut(&id) else {
                    return Ok(false);
                };
                if account.password_hash.as_deref() != Some(current_hash) {
                    return Ok(false);
                }
                account.password_hash = Some(hash.to_string());
                account.password_algo = Some(algo.to_string());
                account.password_updated_at = Some(now);
                account.updated_at = now;
                Ok(true)
            })
            .await
    }

    async fn bump_version(&self, id: i64, deadline: Deadline) -> Result<Option<i64>, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                Ok(state.accounts.get_mut(&id).map(|account| {
                    account.version += 1;
                    account.updated_at = Utc::now();
                    account.version
                }))
            })
            .await
    }

    async fn create(
        &self,
        account: &NewAccount,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<i64, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                if account
                    .email
                    .as_deref()
                    .is_some_and(|email| state.email_taken(email))
                    || account
                        .username
                        .as_deref()
                        .is_some_and(|username| state.username_taken(username))
                {
                    return Err(StoreError::Conflict);
                }

                state.next_id += 1;
                let id = state.next_id;
                state.accounts.insert(
                    id,
                    Account {
                        id,
                        username: account.username.clone(),
                        email: account.email.as_deref().map(str::to_lowercase),
                        email_verified: false,
                        password_hash: Some(account.password_hash.clone()),
                        password_algo: Some(account.password_algo.clone()),
                        password_updated_at: Some(now),
                        must_reset_password: account.must_reset_password,
                        status: AccountStatus::Active,
                        login_failed_attempts: 0,
                        locked_until: None,
                        last_login_at: None,
                        user_type: account.user_type.clone(),
                        version: 1,
                        created_at: now,
                        updated_at: now,
                        deactivated_at: None,
                    },
                );
                Ok(id)
            })
            .await
    }

    async fn deactivate(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                Ok(state.accounts.get_mut(&id).is_some_and(|account| {
                    account.status = AccountStatus::Disabled;
                    account.deactivated_at = Some(now);
                    account.updated_at = now;
                    true
                }))
            })
            .await
    }

    async fn reactivate(&self, id: i64, deadline: Deadline) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let mut state = self.state.lock().await;
                let Some(account) = state.accounts.get_mut(&id) else {
                    return Ok(false);
                };
                if account.status != AccountStatus::Disabled {
                    return Ok(false);
                }
                account.status = AccountStatus::Active;
                account.deactivated_at = None;
                account.updated_at = Utc::now();
                Ok(true)
            })
            .await
    }

    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError> {
        deadline
            .run(async {
                drop(self.state.lock().await);
                Ok(())
            })
            .await
    }
}
