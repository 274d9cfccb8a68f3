use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let issuer = matches
        .get_one::<String>("issuer")
        .cloned()
        .context("missing required argument: --issuer")?;
    Url::parse(&issuer).with_context(|| format!("invalid WARDEN_ISSUER: {issuer}"))?;

    let request_timeout_ms = matches
        .get_one::<u64>("request-timeout-ms")
        .copied()
        .unwrap_or(5000);

    Ok(Action::Server(Args {
        port,
        dsn,
        issuer,
        signing_key_path: matches.get_one::<PathBuf>("signing-key-path").cloned(),
        access_token_ttl_seconds: matches
            .get_one::<i64>("access-token-ttl-seconds")
            .copied()
            .unwrap_or(crate::tokens::DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
        refresh_token_ttl_seconds: matches
            .get_one::<i64>("refresh-token-ttl-seconds")
            .copied()
            .unwrap_or(crate::tokens::DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
        max_failed_logins: matches
            .get_one::<i32>("max-failed-logins")
            .copied()
            .unwrap_or(crate::auth::DEFAULT_MAX_FAILED_LOGINS),
        lock_minutes: matches
            .get_one::<i64>("lock-minutes")
            .copied()
            .unwrap_or(crate::auth::DEFAULT_LOCK_MINUTES),
        request_timeout: Duration::from_millis(request_timeout_ms),
        db_max_connections: matches
            .get_one::<u32>("db-max-connections")
            .copied()
            .unwrap_or(5),
    }))
}
