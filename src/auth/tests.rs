#![allow(clippy::unwrap_used)]

use super::*;
use crate::{
    accounts::{AccountStatus, AccountStore, MemoryAccountStore, MinimalAuthView, NewAccount},
    clock::ManualClock,
    credentials::{Argon2Hasher, PasswordHasher},
    store::Deadline,
};
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration as StdDuration};

const PASSWORD: &str = "correct horse battery staple";

struct Fixture {
    service: AuthService,
    accounts: Arc<MemoryAccountStore>,
    clock: Arc<ManualClock>,
    id: i64,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn deadline() -> Deadline {
    Deadline::after(StdDuration::from_secs(5))
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

fn fast_hasher() -> Argon2Hasher {
    Argon2Hasher::new(1024, 1, 1).unwrap()
}

async fn fixture_with(hasher: Argon2Hasher, must_reset_password: bool) -> Result<Fixture> {
    let accounts = Arc::new(MemoryAccountStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let hashed = fast_hasher().hash(&secret(PASSWORD))?;

    let id = accounts
        .create(
            &NewAccount {
                username: Some("alice".to_string()),
                email: Some("alice@example.com".to_string()),
                password_hash: hashed.hash,
                password_algo: hashed.algo,
                user_type: Some("member".to_string()),
                must_reset_password,
            },
            start(),
            deadline(),
        )
        .await?;

    let service = AuthService::new(
        accounts.clone(),
        Arc::new(hasher),
        clock.clone(),
        LockoutPolicy::default(),
    );

    Ok(Fixture {
        service,
        accounts,
        clock,
        id,
    })
}

async fn fixture() -> Result<Fixture> {
    fixture_with(fast_hasher(), false).await
}

impl Fixture {
    async fn login(&self, password: &str) -> Result<MinimalAuthView, AuthError> {
        self.service
            .authenticate("alice", &secret(password), deadline())
            .await
    }

    async fn account(&self) -> crate::accounts::Account {
        self.accounts.snapshot(self.id).await.unwrap()
    }
}

#[tokio::test]
async fn login_by_username_and_email() -> Result<()> {
    let fx = fixture().await?;

    let view = fx.login(PASSWORD).await?;
    assert_eq!(view.id, fx.id);
    assert_eq!(view.version, 1);
    assert_eq!(view.user_type.as_deref(), Some("member"));

    let by_email = fx
        .service
        .authenticate("  Alice@Example.com ", &secret(PASSWORD), deadline())
        .await?;
    assert_eq!(by_email.id, fx.id);
    assert_eq!(fx.account().await.last_login_at, Some(start()));
    Ok(())
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() -> Result<()> {
    let fx = fixture().await?;

    let unknown = fx
        .service
        .authenticate("mallory", &secret(PASSWORD), deadline())
        .await;
    let wrong = fx.login("nope").await;
    let empty = fx
        .service
        .authenticate("   ", &secret(PASSWORD), deadline())
        .await;

    assert!(matches!(unknown, Err(AuthError::BadCredentials)));
    assert!(matches!(wrong, Err(AuthError::BadCredentials)));
    assert!(matches!(empty, Err(AuthError::BadCredentials)));
    assert_eq!(
        unknown.unwrap_err().to_string(),
        wrong.unwrap_err().to_string()
    );
    Ok(())
}

#[tokio::test]
async fn repeated_failures_lock_the_account() -> Result<()> {
    let fx = fixture().await?;

    for attempt in 1..=6 {
        assert!(matches!(
            fx.login("wrong").await,
            Err(AuthError::BadCredentials)
        ));
        assert_eq!(fx.account().await.login_failed_attempts, attempt);
    }

    let account = fx.account().await;
    assert_eq!(account.status, AccountStatus::Locked);
    assert_eq!(
        account.locked_until,
        Some(start() + chrono::Duration::minutes(15))
    );

    // The correct password does not get through a live lock.
    assert!(matches!(fx.login(PASSWORD).await, Err(AuthError::Locked)));
    fx.clock.advance(chrono::Duration::minutes(15));
    assert!(matches!(fx.login(PASSWORD).await, Err(AuthError::Locked)));
    Ok(())
}

#[tokio::test]
async fn sixth_failure_from_five_locks_immediately() -> Result<()> {
    let fx = fixture().await?;
    let mut account = fx.account().await;
    account.login_failed_attempts = 5;
    fx.accounts.put(account).await;

    fx.clock.advance(chrono::Duration::minutes(3));
    assert!(matches!(
        fx.login("wrong").await,
        Err(AuthError::BadCredentials)
    ));

    let account = fx.account().await;
    assert_eq!(account.login_failed_attempts, 6);
    assert_eq!(account.status, AccountStatus::Locked);
    assert_eq!(
        account.locked_until,
        Some(start() + chrono::Duration::minutes(18))
    );
    assert!(matches!(fx.login(PASSWORD).await, Err(AuthError::Locked)));
    Ok(())
}

#[tokio::test]
async fn success_resets_failure_counter() -> Result<()> {
    let fx = fixture().await?;
    for _ in 0..3 {
        let _ = fx.login("wrong").await;
    }
    assert_eq!(fx.account().await.login_failed_attempts, 3);

    fx.login(PASSWORD).await?;
    let account = fx.account().await;
    assert_eq!(account.login_failed_attempts, 0);
    assert!(account.locked_until.is_none());
    assert_eq!(account.status, AccountStatus::Active);
    Ok(())
}

#[tokio::test]
async fn expired_lock_unlocks_on_next_login() -> Result<()> {
    let fx = fixture().await?;
    for _ in 0..6 {
        let _ = fx.login("wrong").await;
    }
    assert_eq!(fx.account().await.status, AccountStatus::Locked);

    fx.clock
        .advance(chrono::Duration::minutes(15) + chrono::Duration::seconds(1));
    let view = fx.login(PASSWORD).await?;
    assert_eq!(view.id, fx.id);

    let account = fx.account().await;
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.login_failed_attempts, 0);
    assert!(account.locked_until.is_none());
    Ok(())
}

#[tokio::test]
async fn unlock_keeps_counter_so_one_more_failure_relocks() -> Result<()> {
    let fx = fixture().await?;
    for _ in 0..6 {
        let _ = fx.login("wrong").await;
    }
    fx.clock
        .advance(chrono::Duration::minutes(15) + chrono::Duration::seconds(1));

    assert!(matches!(
        fx.login("wrong").await,
        Err(AuthError::BadCredentials)
    ));
    let account = fx.account().await;
    assert_eq!(account.login_failed_attempts, 7);
    assert_eq!(account.status, AccountStatus::Locked);
    Ok(())
}

#[tokio::test]
async fn disabled_and_passwordless_accounts() -> Result<()> {
    let fx = fixture().await?;

    fx.service.deactivate(fx.id, deadline()).await?;
    assert!(matches!(fx.login(PASSWORD).await, Err(AuthError::Disabled)));
    assert_eq!(fx.account().await.version, 2);

    assert!(fx.service.reactivate(fx.id, deadline()).await?);
    assert!(!fx.service.reactivate(fx.id, deadline()).await?);
    fx.login(PASSWORD).await?;

    let mut account = fx.account().await;
    account.password_hash = None;
    fx.accounts.put(account).await;
    assert!(matches!(
        fx.login(PASSWORD).await,
        Err(AuthError::BadCredentials)
    ));
    assert!(matches!(
        fx.service.deactivate(999, deadline()).await,
        Err(AuthError::BadCredentials)
    ));
    Ok(())
}

#[tokio::test]
async fn pending_reset_blocks_login_after_correct_password() -> Result<()> {
    let fx = fixture_with(fast_hasher(), true).await?;
    let _ = fx.login("wrong").await;

    assert!(matches!(
        fx.login(PASSWORD).await,
        Err(AuthError::MustResetPassword)
    ));
    // The password was right, so the counter is cleared anyway.
    assert_eq!(fx.account().await.login_failed_attempts, 0);

    fx.service
        .change_password(fx.id, secret("new password"), deadline())
        .await?;
    let view = fx.login("new password").await?;
    assert_eq!(view.version, 2);
    assert!(!fx.account().await.must_reset_password);
    Ok(())
}

#[tokio::test]
async fn stale_hash_is_upgraded_without_version_bump() -> Result<()> {
    let fx = fixture_with(Argon2Hasher::new(2048, 1, 1)?, false).await?;
    let before = fx.account().await;

    let view = fx.login(PASSWORD).await?;
    assert_eq!(view.version, 1);

    let mut upgraded = None;
    for _ in 0..200 {
        let account = fx.account().await;
        if account.password_algo != before.password_algo {
            upgraded = Some(account);
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    let account = upgraded.ok_or_else(|| anyhow::anyhow!("hash was not upgraded"))?;
    assert_eq!(
        account.password_algo.as_deref(),
        Some("argon2id:m=2048,t=1,p=1")
    );
    assert_ne!(account.password_hash, before.password_hash);
    assert_eq!(account.version, 1);

    // The new hash still checks out.
    fx.login(PASSWORD).await?;
    Ok(())
}

/// Holds back hashing of one password until the test releases it.
struct GatedHasher {
    inner: Argon2Hasher,
    held: &'static str,
    release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    passed: std::sync::atomic::AtomicBool,
}

impl PasswordHasher for GatedHasher {
    fn hash(
        &self,
        password: &SecretString,
    ) -> Result<crate::credentials::HashedPassword, crate::credentials::HashError> {
        if password.expose_secret() == self.held {
            if let Ok(release) = self.release.lock() {
                let _ = release.recv();
            }
            let hashed = self.inner.hash(password);
            self.passed.store(true, std::sync::atomic::Ordering::SeqCst);
            return hashed;
        }
        self.inner.hash(password)
    }

    fn verify(&self, stored_hash: &str, password: &SecretString) -> bool {
        self.inner.verify(stored_hash, password)
    }

    fn needs_rehash(&self, stored_hash: &str) -> bool {
        self.inner.needs_rehash(stored_hash)
    }
}

#[tokio::test]
async fn late_rehash_does_not_undo_password_change() -> Result<()> {
    let (release, gate) = std::sync::mpsc::channel();
    let hasher = Arc::new(GatedHasher {
        inner: Argon2Hasher::new(2048, 1, 1)?,
        held: PASSWORD,
        release: std::sync::Mutex::new(gate),
        passed: std::sync::atomic::AtomicBool::new(false),
    });
    let fx = fixture().await?;
    let service = AuthService::new(
        fx.accounts.clone(),
        hasher.clone(),
        fx.clock.clone(),
        LockoutPolicy::default(),
    );

    // Stale hash: login succeeds and queues a rehash of the old password.
    service
        .authenticate("alice", &secret(PASSWORD), deadline())
        .await?;
    service
        .change_password(fx.id, secret("a brand new passphrase"), deadline())
        .await?;
    let changed = fx.account().await;

    release.send(())?;
    for _ in 0..200 {
        if hasher.passed.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(hasher.passed.load(std::sync::atomic::Ordering::SeqCst));
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let account = fx.account().await;
    assert_eq!(account.password_hash, changed.password_hash);
    assert_eq!(account.version, 2);
    assert!(matches!(
        service
            .authenticate("alice", &secret(PASSWORD), deadline())
            .await,
        Err(AuthError::BadCredentials)
    ));
    service
        .authenticate("alice", &secret("a brand new passphrase"), deadline())
        .await?;
    Ok(())
}

#[tokio::test]
async fn current_hash_is_left_alone() -> Result<()> {
    let fx = fixture().await?;
    let before = fx.account().await;
    fx.login(PASSWORD).await?;
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(fx.account().await.password_hash, before.password_hash);
    Ok(())
}

#[tokio::test]
async fn store_timeout_is_infra() -> Result<()> {
    let fx = fixture().await?;
    let elapsed = Deadline::after(StdDuration::ZERO);

    assert!(matches!(
        fx.service
            .authenticate("alice", &secret(PASSWORD), elapsed)
            .await,
        Err(AuthError::Infra(_))
    ));
    assert!(matches!(
        fx.service.invalidate_tokens(fx.id, elapsed).await,
        Err(AuthError::Infra(_))
    ));
    Ok(())
}

#[tokio::test]
async fn signup_validates_and_normalizes() -> Result<()> {
    let fx = fixture().await?;
    let signup = |username: Option<&str>, email: Option<&str>, password: &str| Signup {
        username: username.map(str::to_string),
        email: email.map(str::to_string),
        password: secret(password),
        user_type: None,
        must_reset_password: false,
    };

    for request in [
        signup(None, None, "pw"),
        signup(Some("  "), Some(" "), "pw"),
        signup(Some("bob@home"), None, "pw"),
        signup(None, Some("not-an-email"), "pw"),
        signup(Some("bob"), None, ""),
    ] {
        assert!(matches!(
            fx.service.signup(request, deadline()).await,
            Err(AuthError::InvalidSignup(_))
        ));
    }

    let id = fx
        .service
        .signup(signup(Some(" bob "), Some(" Bob@Example.COM "), "pw"), deadline())
        .await?;
    let account = fx.accounts.snapshot(id).await.unwrap();
    assert_eq!(account.username.as_deref(), Some("bob"));
    assert_eq!(account.email.as_deref(), Some("bob@example.com"));
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.version, 1);

    assert!(matches!(
        fx.service
            .signup(signup(None, Some("ALICE@example.com"), "pw"), deadline())
            .await,
        Err(AuthError::Conflict)
    ));
    assert!(matches!(
        fx.service
            .signup(signup(Some("alice"), None, "pw"), deadline())
            .await,
        Err(AuthError::Conflict)
    ));
    Ok(())
}

#[tokio::test]
async fn invalidate_tokens_bumps_version() -> Result<()> {
    let fx = fixture().await?;
    assert_eq!(fx.service.invalidate_tokens(fx.id, deadline()).await?, 2);
    assert_eq!(fx.login(PASSWORD).await?.version, 2);
    assert!(matches!(
        fx.service.invalidate_tokens(404, deadline()).await,
        Err(AuthError::BadCredentials)
    ));
    Ok(())
}

#[test]
fn default_policy() {
    let policy = LockoutPolicy::default();
    assert_eq!(policy.max_failed(), 6);
    assert_eq!(policy.lock_duration(), chrono::Duration::minutes(15));
}
