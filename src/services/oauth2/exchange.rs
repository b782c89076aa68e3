//! Authorization-code login: redirect → callback → verified provider identity →
//! principal → application tokens.
use std::{collections::HashMap, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::jwk::JwkSet;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::AppError;
use crate::services::auth::{
    AuthError,
    credentials::{CredentialService, ProviderClaims},
    token_service::{IssuedTokenPair, TokenService},
};
use crate::services::cache::Cache;
use crate::services::oauth2::{
    client::ProviderClient,
    id_token::{IdTokenError, verify_id_token},
    provider::ProviderConfig,
    state_store::{PendingAuthorization, PendingAuthorizations},
};

const JWKS_TTL: Duration = Duration::from_secs(600);

/// Query parameters the provider sends back to the callback.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

// Per-provider JWKS documents, refreshed after JWKS_TTL or on an unknown `kid`.
#[derive(Default)]
struct JwksCache {
    entries: Mutex<HashMap<String, (Instant, Arc<JwkSet>)>>,
}

impl JwksCache {
    fn get(&self, provider: &str) -> Option<Arc<JwkSet>> {
        let entries = self.entries.lock();
        entries
            .get(provider)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < JWKS_TTL)
            .map(|(_, jwks)| jwks.clone())
    }

    fn put(&self, provider: &str, jwks: JwkSet) -> Arc<JwkSet> {
        let jwks = Arc::new(jwks);
        self.entries
            .lock()
            .insert(provider.to_string(), (Instant::now(), jwks.clone()));
        jwks
    }
}

pub struct OAuth2Service {
    providers: HashMap<String, ProviderConfig>,
    client: Arc<dyn ProviderClient>,
    pending: PendingAuthorizations<Cache>,
    credentials: Arc<CredentialService>,
    tokens: Arc<TokenService>,
    jwks: JwksCache,
}

impl std::fmt::Debug for OAuth2Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Service")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn provider_error() -> AppError {
    AppError::Auth(AuthError::ProviderError)
}

fn random_token(len: usize) -> Result<String, AppError> {
    let mut bytes = vec![0u8; len];
    getrandom::fill(&mut bytes).map_err(|e| {
        error!(error = %e, "getrandom failed");
        AppError::Internal
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

impl OAuth2Service {
    pub fn new(
        providers: Vec<ProviderConfig>,
        client: Arc<dyn ProviderClient>,
        pending: PendingAuthorizations<Cache>,
        credentials: Arc<CredentialService>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            client,
            pending,
            credentials,
            tokens,
            jwks: JwksCache::default(),
        }
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderConfig, AppError> {
        self.providers
            .get(name)
            .ok_or_else(|| AppError::not_found("provider"))
    }

    /// Start a login: remember `state` (plus PKCE verifier and nonce) and build the
    /// provider's authorization URL.
    pub async fn authorization_url(&self, provider_name: &str) -> Result<Url, AppError> {
        let provider = self.provider(provider_name)?;

        let state = random_token(32)?;
        let code_verifier = provider.pkce.then(|| random_token(32)).transpose()?;
        let nonce = provider.uses_nonce().then(|| random_token(16)).transpose()?;

        let pending = PendingAuthorization {
            provider: provider.name.clone(),
            code_verifier: code_verifier.clone(),
            nonce: nonce.clone(),
        };
        let stored = self.pending.put(&state, &pending).await.map_err(|e| {
            error!(provider = %provider.name, error = %e, "failed to store oauth2 state");
            AppError::Unavailable
        })?;
        if !stored {
            // 32 random bytes colliding means the random source is broken.
            error!(provider = %provider.name, "oauth2 state collision");
            return Err(AppError::Internal);
        }

        let mut url = provider.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &provider.client_id)
                .append_pair("redirect_uri", provider.redirect_uri.as_str())
                .append_pair("state", &state);
            if !provider.scopes.is_empty() {
                query.append_pair("scope", &provider.scopes.join(" "));
            }
            if let Some(verifier) = &code_verifier {
                query
                    .append_pair("code_challenge", &pkce_challenge(verifier))
                    .append_pair("code_challenge_method", "S256");
            }
            if let Some(nonce) = &nonce {
                query.append_pair("nonce", nonce);
            }
        }

        debug!(provider = %provider.name, "oauth2 authorization started");
        Ok(url)
    }

    /// Finish a login from the provider callback and issue application tokens.
    pub async fn complete(
        &self,
        provider_name: &str,
        params: &CallbackParams,
    ) -> Result<IssuedTokenPair, AppError> {
        let claims = self.exchange_identity(provider_name, params).await?;
        let principal = self.credentials.resolve_federated(&claims).await?;

        info!(
            provider = %claims.provider,
            user_id = %principal.id,
            "federated login succeeded"
        );
        self.tokens.issue_token_pair(&principal).await
    }

    /// Callback → verified provider claims. Never returns claims that were not verified
    /// (signed id token) or fetched from the provider with its own access token.
    pub async fn exchange_identity(
        &self,
        provider_name: &str,
        params: &CallbackParams,
    ) -> Result<ProviderClaims, AppError> {
        let provider = self.provider(provider_name)?;

        if let Some(error) = &params.error {
            warn!(
                provider = %provider.name,
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "provider denied authorization"
            );
            return Err(provider_error());
        }

        let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
            warn!(provider = %provider.name, "callback without code or state");
            return Err(provider_error());
        };

        let pending = self
            .pending
            .take(state)
            .await
            .map_err(|e| {
                error!(provider = %provider.name, error = %e, "failed to read oauth2 state");
                AppError::Unavailable
            })?
            .ok_or_else(|| {
                warn!(provider = %provider.name, "unknown, expired or replayed oauth2 state");
                provider_error()
            })?;

        if pending.provider != provider.name {
            warn!(
                provider = %provider.name,
                started_with = %pending.provider,
                "oauth2 state belongs to another provider"
            );
            return Err(provider_error());
        }

        let tokens = self
            .client
            .exchange_code(provider, code, pending.code_verifier.as_deref())
            .await
            .map_err(|e| {
                warn!(provider = %provider.name, error = %e, "code exchange failed");
                provider_error()
            })?;
        if !tokens.is_bearer() {
            warn!(
                provider = %provider.name,
                token_type = tokens.token_type.as_deref().unwrap_or(""),
                "unsupported provider token type"
            );
            return Err(provider_error());
        }

        let payload = match (&tokens.id_token, &provider.jwks_url) {
            (Some(id_token), Some(_)) => {
                self.verified_id_token(provider, id_token, pending.nonce.as_deref())
                    .await?
            }
            _ if provider.userinfo_url.is_some() => self
                .client
                .fetch_userinfo(provider, &tokens.access_token)
                .await
                .map_err(|e| {
                    warn!(provider = %provider.name, error = %e, "userinfo request failed");
                    provider_error()
                })?,
            _ => {
                warn!(provider = %provider.name, "no verifiable identity in provider response");
                return Err(provider_error());
            }
        };

        provider.map_claims(&payload).map_err(|e| {
            warn!(provider = %provider.name, "provider identity without subject");
            AppError::Auth(e)
        })
    }

    async fn verified_id_token(
        &self,
        provider: &ProviderConfig,
        id_token: &str,
        nonce: Option<&str>,
    ) -> Result<serde_json::Value, AppError> {
        let jwks = match self.jwks.get(&provider.name) {
            Some(jwks) => jwks,
            None => self.fetch_jwks(provider).await?,
        };

        let result = match verify_id_token(id_token, &jwks, provider, nonce) {
            // The provider may have rotated keys since the cached fetch.
            Err(IdTokenError::UnknownKey(_)) => {
                let fresh = self.fetch_jwks(provider).await?;
                verify_id_token(id_token, &fresh, provider, nonce)
            }
            other => other,
        };

        result.map_err(|e| {
            warn!(provider = %provider.name, error = %e, "id token verification failed");
            provider_error()
        })
    }

    async fn fetch_jwks(&self, provider: &ProviderConfig) -> Result<Arc<JwkSet>, AppError> {
        let jwks = self.client.fetch_jwks(provider).await.map_err(|e| {
            warn!(provider = %provider.name, error = %e, "jwks request failed");
            provider_error()
        })?;
        Ok(self.jwks.put(&provider.name, jwks))
    }
}
