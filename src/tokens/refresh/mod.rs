//! Opaque refresh-token sessions.
//!
//! The raw token goes back to the client once; stores key rows by
//! `SHA-256(token)` so a database dump never yields usable tokens.

mod memory;
mod postgres;

pub use memory::MemoryRefreshTokenStore;
pub use postgres::PgRefreshTokenStore;

use crate::store::{Deadline, StoreError};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

pub const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub account_id: i64,
    pub client_id: String,
    pub expires_at: DateTime<Utc>,
}

impl RefreshSession {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(
        &self,
        token: &str,
        session: &RefreshSession,
        deadline: Deadline,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<Option<RefreshSession>, StoreError>;

    /// Remove the session. Returns whether a row was actually removed, which is
    /// what makes rotation exactly-once.
    async fn delete(&self, token: &str, deadline: Deadline) -> Result<bool, StoreError>;

    /// Remove every session of an account and return how many were removed.
    async fn delete_for_account(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<u64, StoreError>;
}

/// Create a new refresh token: 256 bits from the OS CSPRNG, base64url without padding.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_refresh_token() -> Result<String, rand::Error> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Storage key for a refresh token.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_url_safe_and_unique() -> Result<(), rand::Error> {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let token = generate_refresh_token()?;
            // 32 bytes -> 43 base64url characters.
            assert_eq!(token.len(), 43);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
            assert!(seen.insert(token));
        }
        Ok(())
    }

    #[test]
    fn hash_is_stable_sha256() {
        let first = hash_refresh_token("token");
        assert_eq!(first.len(), 32);
        assert_eq!(first, hash_refresh_token("token"));
        assert_ne!(first, hash_refresh_token("token2"));
    }
}
