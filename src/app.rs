/*
 * Responsibility
 * - Config → backends → AppState → Router
 * - Cross-cutting middleware (request id, trace, CORS, security headers)
 * - axum::serve() with graceful shutdown; SIGHUP rotates the signing key
 */
use std::{panic, process, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::health::health;
use crate::config::Config;
use crate::middleware;
use crate::repos::user_repo::PgUserDirectory;
use crate::services::auth::factory::{self, Backends};
use crate::services::cache::{Cache, MemoryCache, ValkeyClient};
use crate::services::oauth2::client::HttpProviderClient;
use crate::state::AppState;

fn init_tracing() {
    // RUST_LOG wins, e.g. RUST_LOG=info,authgate=debug,tower_http=debug
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // stderr may be hidden depending on how the process is launched
        tracing::error!(?info, "panic");

        // Development: crash the whole process so the panic is noticed.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    info!(
        "starting authgate in {:?} mode on {}",
        config.app_env, config.addr
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("connect to DATABASE_URL")?;

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("apply migrations")?;
    }

    let cache = build_cache(&config).await?;
    let provider_client = HttpProviderClient::new(config.oauth2_http_timeout)
        .context("build OAuth2 HTTP client")?;

    let state = factory::build_app_state(
        &config,
        Backends {
            cache,
            directory: Arc::new(PgUserDirectory::new(pool)),
            provider_client: Arc::new(provider_client),
        },
    )?;

    if config.signing_keys_reloadable() {
        spawn_key_reload(&config, &state);
    }

    let app = build_router(state, &config);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn build_cache(config: &Config) -> anyhow::Result<Cache> {
    match &config.valkey_url {
        Some(url) => {
            let client = ValkeyClient::new(url)
                .await
                .context("connect to VALKEY_URL")?;
            Ok(Cache::Valkey(client))
        }
        None => {
            warn!("VALKEY_URL not set; sessions live in process memory (development only)");
            Ok(Cache::Memory(MemoryCache::new()))
        }
    }
}

pub(crate) fn build_router(state: AppState, config: &Config) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes(state.clone()))
        .with_state(state);

    let router = middleware::security_headers::apply(router);
    let router = middleware::cors::apply(router, config);
    middleware::http::apply(router)
}

// Reload the key files on SIGHUP. The outgoing key stays valid for the grace window.
#[cfg(unix)]
fn spawn_key_reload(config: &Config, state: &AppState) {
    use tokio::signal::unix::{SignalKind, signal};

    let private_key = config.access_jwt_private_key.clone();
    let public_key = config.access_jwt_public_key.clone();
    let codec = state.tokens.codec().clone();

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP; key reload disabled");
                return;
            }
        };

        while hangups.recv().await.is_some() {
            let next = private_key.load().and_then(|private_pem| {
                let public_pem = public_key.load()?;
                crate::services::auth::token_codec::SigningKeyPair::from_pem(
                    &private_pem,
                    &public_pem,
                )
            });

            match next {
                Ok(next) => {
                    let kid = next.kid().to_string();
                    if codec.rotate(next, chrono::Utc::now().timestamp()) {
                        info!(kid = %kid, "signing key rotated");
                    } else {
                        info!(kid = %kid, "signing key unchanged");
                    }
                }
                Err(e) => warn!(error = %e, "signing key reload failed; keeping current key"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_key_reload(_config: &Config, _state: &AppState) {
    warn!("signing key reload is only supported on unix");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
