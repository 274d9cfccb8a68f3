use super::{RefreshSession, RefreshTokenStore, hash_refresh_token};
use crate::store::{Deadline, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    sessions: Mutex<HashMap<Vec<u8>, RefreshSession>>,
}

impl MemoryRefreshTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn insert(
        &self,
        token: &str,
        session: &RefreshSession,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        deadline
            .run(async {
                let mut sessions = self.sessions.lock().await;
                let key = hash_refresh_token(token);
                if sessions.contains_key(&key) {
                    return Err(StoreError::Conflict);
                }
                sessions.insert(key, session.clone());
                Ok(())
            })
            .await
    }

    async fn get(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<Option<RefreshSession>, StoreError> {
        deadline
            .run(async {
                Ok(self
                    .sessions
                    .lock()
                    .await
                    .get(&hash_refresh_token(token))
                    .cloned())
            })
            .await
    }

    async fn delete(&self, token: &str, deadline: Deadline) -> Result<bool, StoreError> {
        deadline
            .run(async {
                Ok(self
                    .sessions
                    .lock()
                    .await
                    .remove(&hash_refresh_token(token))
                    .is_some())
            })
            .await
    }

    async fn delete_for_account(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<u64, StoreError> {
        deadline
            .run(async {
                let mut sessions = self.sessions.lock().await;
                let before = sessions.len();
                sessions.retain(|_, session| session.account_id != account_id);
                Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn session(account_id: i64) -> RefreshSession {
        RefreshSession {
            account_id,
            client_id: "web".to_string(),
            expires_at: Utc::now() + ChronoDuration::days(30),
        }
    }

    #[tokio::test]
    async fn delete_reports_removal_once() -> Result<(), StoreError> {
        let store = MemoryRefreshTokenStore::new();
        let stored = session(1);
        store.insert("t1", &stored, deadline()).await?;

        assert_eq!(store.get("t1", deadline()).await?, Some(stored));
        assert!(store.delete("t1", deadline()).await?);
        assert!(!store.delete("t1", deadline()).await?);
        assert!(store.get("t1", deadline()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() -> Result<(), StoreError> {
        let store = MemoryRefreshTokenStore::new();
        store.insert("t1", &session(1), deadline()).await?;
        assert!(matches!(
            store.insert("t1", &session(2), deadline()).await,
            Err(StoreError::Conflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_for_account_only_touches_owner() -> Result<(), StoreError> {
        let store = MemoryRefreshTokenStore::new();
        store.insert("a1", &session(1), deadline()).await?;
        store.insert("a2", &session(1), deadline()).await?;
        store.insert("b1", &session(2), deadline()).await?;

        assert_eq!(store.delete_for_account(1, deadline()).await?, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get("b1", deadline()).await?.is_some());
        Ok(())
    }
}
