//! HTTP surface: router wiring, middleware and server start-up.

use crate::{
    accounts::{AccountStore, PgAccountStore},
    auth::{AuthService, LockoutPolicy},
    clock::{Clock, SystemClock},
    credentials::{Argon2Hasher, PasswordHasher},
    tokens::{KeyManager, PgRefreshTokenStore, RefreshTokenStore, TokenConfig, TokenService},
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
};
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;

pub mod handlers;
mod openapi;
mod state;

pub use openapi::openapi;
pub use state::{AppState, READY_TIMEOUT};

/// Settings for [`new`], filled from the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub issuer: String,
    pub signing_key_path: Option<PathBuf>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub max_failed_logins: i32,
    pub lock_minutes: i64,
    pub request_timeout: Duration,
    pub db_max_connections: u32,
}

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
    (
        "permissions-policy",
        "camera=(), microphone=(), geolocation=()",
    ),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

/// Build the full application: documented routes plus the middleware stack.
pub fn router(state: Arc<AppState>) -> Router {
    let (router, _openapi) = openapi::api_router().split_for_parts();

    let mut router = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(state)),
    );

    for (name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    router
}

/// Connect to the database, load the signing key and serve until a shutdown
/// signal arrives.
///
/// # Errors
/// Returns an error if the database is unreachable, the signing key cannot be
/// loaded or the listener cannot bind.
pub async fn new(dsn: String, config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.db_max_connections)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let keys = Arc::new(load_signing_key(config.signing_key_path.as_ref()).await?);
    info!(kid = keys.kid(), "Signing key loaded");

    let accounts: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(pool.clone()));
    let refresh_tokens: Arc<dyn RefreshTokenStore> = Arc::new(PgRefreshTokenStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::default());

    let auth = AuthService::new(
        accounts.clone(),
        hasher,
        clock.clone(),
        LockoutPolicy::new(config.max_failed_logins, config.lock_minutes),
    );
    let tokens = TokenService::new(
        TokenConfig::new(config.issuer.as_str())
            .with_access_token_ttl_seconds(config.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(config.refresh_token_ttl_seconds),
        keys,
        refresh_tokens,
        accounts.clone(),
        clock,
    );
    let state = Arc::new(AppState::new(
        auth,
        tokens,
        accounts,
        config.request_timeout,
    ));

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    crate::cli::telemetry::shutdown_tracer();

    Ok(())
}

/// Read a PEM key from `path`, or generate an ephemeral one.
async fn load_signing_key(path: Option<&PathBuf>) -> Result<KeyManager> {
    if let Some(path) = path {
        let pem = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read signing key {}", path.display()))?;
        return KeyManager::from_pem(&pem)
            .with_context(|| format!("Failed to parse signing key {}", path.display()));
    }

    warn!("No signing key configured, generating an ephemeral RSA key");
    tokio::task::spawn_blocking(KeyManager::generate)
        .await
        .context("Key generation task failed")?
        .context("Failed to generate signing key")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
