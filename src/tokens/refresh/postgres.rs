use super::{RefreshSession, RefreshTokenStore, hash_refresh_token};
use crate::store::{Deadline, StoreError, is_unique_violation};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{Instrument, Span, info_span};

#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(
        &self,
        token: &str,
        session: &RefreshSession,
        deadline: Deadline,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO refresh_sessions (token_hash, account_id, client_id, expires_at)
            VALUES ($1, $2, $3, $4)
        ";
        deadline
            .run(async {
                match sqlx::query(query)
                    .bind(hash_refresh_token(token))
                    .bind(session.account_id)
                    .bind(&session.client_id)
                    .bind(session.expires_at)
                    .execute(&self.pool)
                    .instrument(db_span("INSERT", query))
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn get(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<Option<RefreshSession>, StoreError> {
        let query =
            "SELECT account_id, client_id, expires_at FROM refresh_sessions WHERE token_hash = $1";
        deadline
            .run(async {
                let row = sqlx::query(query)
                    .bind(hash_refresh_token(token))
                    .fetch_optional(&self.pool)
                    .instrument(db_span("SELECT", query))
                    .await?;

                row.map(|row| {
                    Ok(RefreshSession {
                        account_id: row.try_get("account_id")?,
                        client_id: row.try_get("client_id")?,
                        expires_at: row.try_get("expires_at")?,
                    })
                })
                .transpose()
            })
            .await
    }

    async fn delete(&self, token: &str, deadline: Deadline) -> Result<bool, StoreError> {
        let query = "DELETE FROM refresh_sessions WHERE token_hash = $1";
        deadline
            .run(async {
                let result = sqlx::query(query)
                    .bind(hash_refresh_token(token))
                    .execute(&self.pool)
                    .instrument(db_span("DELETE", query))
                    .await?;
                Ok(result.rows_affected() > 0)
            })
            .await
    }

    async fn delete_for_account(
        &self,
        account_id: i64,
        deadline: Deadline,
    ) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_sessions WHERE account_id = $1";
        deadline
            .run(async {
                let result = sqlx::query(query)
                    .bind(account_id)
                    .execute(&self.pool)
                    .instrument(db_span("DELETE", query))
                    .await?;
                Ok(result.rows_affected())
            })
            .await
    }
}
