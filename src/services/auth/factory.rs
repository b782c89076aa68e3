//! Factory: build the auth services and `AppState` from application `Config`.
//!
//! Backends (cache, user directory, provider HTTP client) are passed in so tests can
//! substitute in-memory doubles.
use std::{sync::Arc, time::Duration};

use anyhow::Context;

use crate::api::v1::frontend::ACCESS_TOKEN_COOKIE;
use crate::config::{Config, ConfigError};
use crate::middleware::auth::{AuthPipeline, CacheFailurePolicy};
use crate::repos::user_repo::UserDirectory;
use crate::services::auth::{
    credentials::{CredentialService, CredentialSettings},
    password::Passwords,
    refresh_token::RefreshTokenService,
    session::{SessionCache, SessionStore},
    token_codec::{CodecSettings, SigningKeyPair, TokenCodec},
    token_service::TokenService,
};
use crate::services::cache::Cache;
use crate::services::oauth2::{
    OAuth2Service, client::ProviderClient, state_store::PendingAuthorizations,
};
use crate::state::AppState;

pub struct Backends {
    pub cache: Cache,
    pub directory: Arc<dyn UserDirectory>,
    pub provider_client: Arc<dyn ProviderClient>,
}

/// Load the configured signing key pair (inline PEM or files).
pub fn signing_keys(config: &Config) -> Result<SigningKeyPair, ConfigError> {
    let private_pem = config.access_jwt_private_key.load()?;
    let public_pem = config.access_jwt_public_key.load()?;
    SigningKeyPair::from_pem(&private_pem, &public_pem)
}

pub fn build_token_codec(config: &Config) -> Result<Arc<TokenCodec>, ConfigError> {
    let previous = config
        .access_jwt_previous_public_key
        .as_ref()
        .map(|source| source.load())
        .transpose()?;

    let codec = TokenCodec::new(
        signing_keys(config)?,
        previous.as_deref(),
        CodecSettings {
            issuer: config.auth_issuer.clone(),
            audience: config.auth_audience.clone(),
            leeway_seconds: config.access_token_leeway_seconds,
            previous_key_grace_seconds: config.previous_key_grace_seconds,
        },
    )?;

    Ok(Arc::new(codec))
}

/// Startup wiring; configuration errors keep their type under the anyhow context.
pub fn build_app_state(config: &Config, backends: Backends) -> anyhow::Result<AppState> {
    let Backends {
        cache,
        directory,
        provider_client,
    } = backends;

    let codec = build_token_codec(config).context("load access token signing keys")?;
    let passwords = Passwords::new().context("prepare password hasher")?;

    let sessions: Arc<dyn SessionStore> = Arc::new(SessionCache::new(cache.clone()));

    let credentials = Arc::new(CredentialService::new(
        directory.clone(),
        passwords,
        CredentialSettings {
            email_policy: config.federated_email_policy,
            default_roles: config.default_roles.clone(),
            check_timeout: config.credential_check_timeout,
        },
    ));

    let tokens = Arc::new(TokenService::new(
        codec.clone(),
        sessions.clone(),
        RefreshTokenService::new(
            cache.clone(),
            Duration::from_secs(config.refresh_token_ttl_seconds),
        ),
        directory,
        Duration::from_secs(config.access_token_ttl_seconds),
    ));

    let oauth2 = Arc::new(OAuth2Service::new(
        config.oauth2_providers.clone(),
        provider_client,
        PendingAuthorizations::new(cache.clone(), config.oauth2_state_ttl),
        credentials.clone(),
        tokens.clone(),
    ));

    let on_cache_failure = if config.session_cache_fail_open {
        CacheFailurePolicy::FailOpen
    } else {
        CacheFailurePolicy::FailClosed
    };
    let auth_pipeline = Arc::new(AuthPipeline::standard(
        codec,
        sessions,
        config.session_cache_timeout,
        on_cache_failure,
        config.frontend.as_ref().map(|_| ACCESS_TOKEN_COOKIE),
    ));

    Ok(AppState {
        cache,
        credentials,
        tokens,
        oauth2,
        auth_pipeline,
        frontend: config.frontend.clone().map(Arc::new),
    })
}
