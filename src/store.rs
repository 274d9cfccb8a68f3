//! Shared plumbing for the persistence seams: the per-request deadline and the
//! store error type.

use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store deadline exceeded")]
    Timeout,
    #[error("unique constraint violated")]
    Conflict,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Point in time after which no further store I/O is attempted for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Run one store operation under this deadline.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Timeout` if the deadline has already passed or passes
    /// before `operation` completes, otherwise whatever `operation` returns.
    pub async fn run<T, F>(self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.is_elapsed() {
            return Err(StoreError::Timeout);
        }
        tokio::time::timeout_at(self.0, operation)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
