use crate::api::{self, ServerConfig};
use anyhow::Result;
use std::{path::PathBuf, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub issuer: String,
    pub signing_key_path: Option<PathBuf>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub max_failed_logins: i32,
    pub lock_minutes: i64,
    pub request_timeout: Duration,
    pub db_max_connections: u32,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database, the signing key or the listener fail.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = ServerConfig {
        port: args.port,
        issuer: args.issuer,
        signing_key_path: args.signing_key_path,
        access_token_ttl_seconds: args.access_token_ttl_seconds,
        refresh_token_ttl_seconds: args.refresh_token_ttl_seconds,
        max_failed_logins: args.max_failed_logins,
        lock_minutes: args.lock_minutes,
        request_timeout: args.request_timeout,
        db_max_connections: args.db_max_connections,
    };

    api::new(args.dsn, config).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("issuer", args.issuer.clone()),
        (
            "signing_key",
            args.signing_key_path
                .as_ref()
                .map_or_else(|| "ephemeral".to_string(), |p| p.display().to_string()),
        ),
        ("access_ttl", format!("{}s", args.access_token_ttl_seconds)),
        ("refresh_ttl", format!("{}s", args.refresh_token_ttl_seconds)),
        (
            "lockout",
            format!("{} failures / {}m", args.max_failed_logins, args.lock_minutes),
        ),
        (
            "request_timeout",
            format!("{}ms", args.request_timeout.as_millis()),
        ),
        ("db_max_connections", args.db_max_connections.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn banner() -> String {
    format!(
        "W A R D E N - {} - {}",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    )
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_password_is_redacted() {
        assert_eq!(
            redact_dsn("postgres://warden:hunter2@db:5432/warden"),
            "postgres://warden:REDACTED@db:5432/warden"
        );
        assert_eq!(
            redact_dsn("postgres://db:5432/warden"),
            "postgres://db:5432/warden"
        );
        assert_eq!(redact_dsn("::not a url::"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }
}
