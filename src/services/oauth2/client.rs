//! Outbound calls to identity providers (token, userinfo and JWKS endpoints).
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use thiserror::Error;

use crate::services::oauth2::provider::ProviderConfig;

#[derive(Debug, Error)]
pub enum ProviderFailure {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}")]
    Status { status: u16 },
    #[error("provider response unreadable: {0}")]
    Decode(String),
}

/// Token endpoint response (RFC 6749 §5.1, plus the OIDC `id_token`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl ProviderTokens {
    /// Bearer, or no `token_type` at all. Compared case-insensitively (Kakao sends `bearer`).
    pub fn is_bearer(&self) -> bool {
        self.token_type
            .as_deref()
            .is_none_or(|t| t.eq_ignore_ascii_case("bearer"))
    }
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Authorization-code grant. `code_verifier` is sent when PKCE was used.
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ProviderTokens, ProviderFailure>;

    async fn fetch_userinfo(
        &self,
        provider: &ProviderConfig,
        access_token: &str,
    ) -> Result<serde_json::Value, ProviderFailure>;

    async fn fetch_jwks(&self, provider: &ProviderConfig) -> Result<JwkSet, ProviderFailure>;
}

#[derive(Clone, Debug)]
pub struct HttpProviderClient {
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderFailure> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderFailure> {
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderFailure::Status {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderFailure::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ProviderTokens, ProviderFailure> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", provider.redirect_uri.as_str()),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(provider.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn fetch_userinfo(
        &self,
        provider: &ProviderConfig,
        access_token: &str,
    ) -> Result<serde_json::Value, ProviderFailure> {
        let url = provider
            .userinfo_url
            .clone()
            .ok_or_else(|| ProviderFailure::Decode("no userinfo endpoint".to_string()))?;

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        Self::read_json(response).await
    }

    async fn fetch_jwks(&self, provider: &ProviderConfig) -> Result<JwkSet, ProviderFailure> {
        let url = provider
            .jwks_url
            .clone()
            .ok_or_else(|| ProviderFailure::Decode("no jwks endpoint".to_string()))?;

        let response = self.http.get(url).send().await?;
        Self::read_json(response).await
    }
}
