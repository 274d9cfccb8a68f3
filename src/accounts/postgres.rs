//! `PostgreSQL` implementation of [`AccountStore`].

use super::{Account, AccountStatus, AccountStore, MinimalAuthView, NewAccount};
use crate::store::{Deadline, StoreError, is_unique_violation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use tracing::{Instrument, Span, info_span};

const ACCOUNT_COLUMNS: &str = "id, username, email, email_verified, password_hash, password_algo, \
     password_updated_at, must_reset_password, status, login_failed_attempts, locked_until, \
     last_login_at, user_type, version, created_at, updated_at, deactivated_at";

#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_account(
        &self,
        query: &str,
        bind: AccountKey<'_>,
    ) -> Result<Option<Account>, StoreError> {
        let span = db_span("SELECT", query);
        let statement = sqlx::query(query);
        let statement = match bind {
            AccountKey::Id(id) => statement.bind(id),
            AccountKey::Text(value) => statement.bind(value),
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    /// Run a conditional UPDATE and report whether it matched a row.
    async fn execute_changed(
        &self,
        statement: Query<'_, Postgres, PgArguments>,
        query: &str,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        deadline
            .run(async {
                let result = statement
                    .execute(&self.pool)
                    .instrument(db_span("UPDATE", query))
                    .await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }
}

enum AccountKey<'a> {
    Id(i64),
    Text(&'a str),
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        email_verified: row.try_get("email_verified")?,
        password_hash: row.try_get("password_hash")?,
        password_algo: row.try_get("password_algo")?,
        password_updated_at: row.try_get("password_updated_at")?,
        must_reset_password: row.try_get("must_reset_password")?,
        status: status.parse::<AccountStatus>()?,
        login_failed_attempts: row.try_get("login_failed_attempts")?,
        locked_until: row.try_get("locked_until")?,
        last_login_at: row.try_get("last_login_at")?,
        user_type: row.try_get("user_type")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deactivated_at: row.try_get("deactivated_at")?,
    })
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_email(
        &self,
        email: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(email) = lower($1)");
        deadline
            .run(self.fetch_account(&query, AccountKey::Text(email)))
            .await
    }

    async fn find_by_username(
        &self,
        username: &str,
        deadline: Deadline,
    ) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        deadline
            .run(self.fetch_account(&query, AccountKey::Text(username)))
            .await
    }

    async fn find_by_id(&self, id: i64, deadline: Deadline) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        deadline
            .run(self.fetch_account(&query, AccountKey::Id(id)))
            .await
    }

    async fn minimal_view(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<MinimalAuthView>, StoreError> {
        let query =
            "SELECT id, user_type, version, email, email_verified FROM accounts WHERE id = $1";
        deadline
            .run(async {
                let row = sqlx::query(query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span("SELECT", query))
                    .await?;
                row.map(|row| {
                    Ok(MinimalAuthView {
                        id: row.try_get("id")?,
                        user_type: row.try_get("user_type")?,
                        version: row.try_get("version")?,
                        email: row.try_get("email")?,
                        email_verified: row.try_get("email_verified")?,
                    })
                })
                .transpose()
            })
            .await
    }

    async fn increment_failed_attempts(
        &self,
        id: i64,
        deadline: Deadline,
    ) -> Result<Option<i32>, StoreError> {
        let query = r"
            UPDATE accounts
            SET login_failed_attempts = login_failed_attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING login_failed_attempts
        ";
        deadline
            .run(async {
                let row = sqlx::query(query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span("UPDATE", query))
                    .await?;
                Ok(row
                    .map(|row| row.try_get::<i32, _>("login_failed_attempts"))
                    .transpose()?)
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
        let query = r"
            UPDATE accounts
            SET status = 'locked', locked_until = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND login_failed_attempts >= $2
        ";
        let statement = sqlx::query(query).bind(id).bind(threshold).bind(locked_until);
        self.execute_changed(statement, query, deadline).await
    }

    async fn unlock_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET status = 'active', locked_until = NULL, updated_at = NOW()
            WHERE id = $1
              AND status = 'locked'
              AND locked_until IS NOT NULL
              AND locked_until < $2
        ";
        let statement = sqlx::query(query).bind(id).bind(now);
        self.execute_changed(statement, query, deadline).await
    }

    async fn reset_after_success(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE accounts
            SET login_failed_attempts = 0, last_login_at = $2, locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
        ";
        let statement = sqlx::query(query).bind(id).bind(now);
        self.execute_changed(statement, query, deadline)
            .await
            .map(drop)
    }

    async fn update_password(
        &self,
        id: i64,
        hash: &str,
        algo: &str,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE accounts
            SET password_hash = $2,
                password_algo = $3,
                password_updated_at = $4,
                version = version + 1,
                must_reset_password = FALSE,
                updated_at = NOW()
            WHERE id = $1
        ";
        let statement = sqlx::query(query).bind(id).bind(hash).bind(algo).bind(now);
        self.execute_changed(statement, query, deadline)
            .await
            .map(drop)
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
        let query = r"
            UPDATE accounts
            SET password_hash = $3,
                password_algo = $4,
                password_updated_at = $5,
                updated_at = NOW()
            WHERE id = $1 AND password_hash = $2
        ";
        let statement = sqlx::query(query)
            .bind(id)
            .bind(current_hash)
            .bind(hash)
            .bind(algo)
            .bind(now);
        self.execute_changed(statement, query, deadline).await
    }

    async fn bump_version(&self, id: i64, deadline: Deadline) -> Result<Option<i64>, StoreError> {
        let query = r"
            UPDATE accounts SET version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING version
        ";
        deadline
            .run(async {
                let row = sqlx::query(query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .instrument(db_span("UPDATE", query))
                    .await?;
                Ok(row.map(|row| row.try_get::<i64, _>("version")).transpose()?)
            })
            .await
    }

    async fn create(
        &self,
        account: &NewAccount,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<i64, StoreError> {
        let query = r"
            INSERT INTO accounts
                (username, email, password_hash, password_algo, password_updated_at,
                 must_reset_password, user_type, status, version, created_at, updated_at)
            VALUES ($1, lower($2), $3, $4, $5, $6, $7, 'active', 1, $5, $5)
            RETURNING id
        ";
        deadline
            .run(async {
                let row = sqlx::query(query)
                    .bind(account.username.as_deref())
                    .bind(account.email.as_deref())
                    .bind(&account.password_hash)
                    .bind(&account.password_algo)
                    .bind(now)
                    .bind(account.must_reset_password)
                    .bind(account.user_type.as_deref())
                    .fetch_one(&self.pool)
                    .instrument(db_span("INSERT", query))
                    .await;

                match row {
                    Ok(row) => Ok(row.try_get("id")?),
                    Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn deactivate(
        &self,
        id: i64,
        now: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET status = 'disabled', deactivated_at = $2, updated_at = NOW()
            WHERE id = $1
        ";
        let statement = sqlx::query(query).bind(id).bind(now);
        self.execute_changed(statement, query, deadline).await
    }

    async fn reactivate(&self, id: i64, deadline: Deadline) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET status = 'active', deactivated_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'disabled'
        ";
        let statement = sqlx::query(query).bind(id);
        self.execute_changed(statement, query, deadline).await
    }

    async fn ping(&self, deadline: Deadline) -> Result<(), StoreError> {
        let query = "SELECT 1";
        deadline
            .run(async {
                sqlx::query(query)
                    .execute(&self.pool)
                    .instrument(db_span("SELECT", query))
                    .await?;
                Ok(())
            })
            .await
    }
}
