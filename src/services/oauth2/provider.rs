//! Provider registrations and the mapping of provider-specific identity payloads onto
//! `ProviderClaims`.
use serde_json::Value;
use url::Url;

use crate::services::auth::{AuthError, credentials::ProviderClaims};

/// Shape of the identity payload a provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimProfile {
    /// OpenID Connect: `sub`, `email`, `email_verified`, `name`.
    Oidc,
    /// `id`, `kakao_account.{email,is_email_verified}`, `properties.nickname`.
    Kakao,
    /// `response.{id,email,nickname}`; the email is not marked verified.
    Naver,
}

impl ClaimProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oidc" => Some(Self::Oidc),
            "kakao" => Some(Self::Kakao),
            "naver" => Some(Self::Naver),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub userinfo_url: Option<Url>,
    pub jwks_url: Option<Url>,
    // Accepted `iss` values of id tokens. Non-empty whenever `jwks_url` is set.
    pub issuers: Vec<String>,
    pub scopes: Vec<String>,
    pub redirect_uri: Url,
    pub profile: ClaimProfile,
    pub pkce: bool,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the client secret
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("profile", &self.profile)
            .field("pkce", &self.pkce)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// OIDC nonce is only meaningful when the id token is verified.
    pub fn uses_nonce(&self) -> bool {
        self.jwks_url.is_some()
    }

    pub fn map_claims(&self, payload: &Value) -> Result<ProviderClaims, AuthError> {
        map_claims(&self.name, self.profile, payload)
    }
}

/// Endpoint defaults for well-known providers. Every field can be overridden.
#[derive(Debug, Clone, Copy)]
pub struct ProviderPreset {
    pub authorize_url: &'static str,
    pub token_url: &'static str,
    pub userinfo_url: Option<&'static str>,
    pub jwks_url: Option<&'static str>,
    pub issuers: &'static [&'static str],
    pub scopes: &'static [&'static str],
    pub profile: ClaimProfile,
    pub pkce: bool,
}

pub fn preset(name: &str) -> Option<ProviderPreset> {
    match name {
        "google" => Some(ProviderPreset {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            userinfo_url: Some("https://openidconnect.googleapis.com/v1/userinfo"),
            jwks_url: Some("https://www.googleapis.com/oauth2/v3/certs"),
            issuers: &["https://accounts.google.com", "accounts.google.com"],
            scopes: &["openid", "email", "profile"],
            profile: ClaimProfile::Oidc,
            pkce: true,
        }),
        "kakao" => Some(ProviderPreset {
            authorize_url: "https://kauth.kakao.com/oauth/authorize",
            token_url: "https://kauth.kakao.com/oauth/token",
            userinfo_url: Some("https://kapi.kakao.com/v2/user/me"),
            jwks_url: None,
            issuers: &[],
            scopes: &["profile_nickname", "account_email"],
            profile: ClaimProfile::Kakao,
            pkce: true,
        }),
        "naver" => Some(ProviderPreset {
            authorize_url: "https://nid.naver.com/oauth2.0/authorize",
            token_url: "https://nid.naver.com/oauth2.0/token",
            userinfo_url: Some("https://openapi.naver.com/v1/nid/me"),
            jwks_url: None,
            issuers: &[],
            scopes: &[],
            profile: ClaimProfile::Naver,
            pkce: false,
        }),
        _ => None,
    }
}

fn str_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(payload, |v, key| v.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

// Subjects may be numbers (Kakao) or strings.
fn id_at(payload: &Value, path: &[&str]) -> Option<String> {
    match path.iter().try_fold(payload, |v, key| v.get(key))? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// `email_verified` is a bool, but some providers send "true"/"false".
fn flag_at(payload: &Value, path: &[&str]) -> bool {
    match path.iter().try_fold(payload, |v, key| v.get(key)) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub fn map_claims(
    provider: &str,
    profile: ClaimProfile,
    payload: &Value,
) -> Result<ProviderClaims, AuthError> {
    let (subject, email, email_verified, name) = match profile {
        ClaimProfile::Oidc => (
            id_at(payload, &["sub"]),
            str_at(payload, &["email"]),
            flag_at(payload, &["email_verified"]),
            str_at(payload, &["name"]),
        ),
        ClaimProfile::Kakao => (
            id_at(payload, &["id"]),
            str_at(payload, &["kakao_account", "email"]),
            flag_at(payload, &["kakao_account", "is_email_verified"])
                && flag_at(payload, &["kakao_account", "is_email_valid"]),
            str_at(payload, &["properties", "nickname"])
                .or_else(|| str_at(payload, &["kakao_account", "profile", "nickname"])),
        ),
        ClaimProfile::Naver => (
            id_at(payload, &["response", "id"]),
            str_at(payload, &["response", "email"]),
            false,
            str_at(payload, &["response", "nickname"])
                .or_else(|| str_at(payload, &["response", "name"])),
        ),
    };

    let subject = subject.ok_or(AuthError::ProviderError)?;
    let email = email.map(str::to_string);

    Ok(ProviderClaims {
        provider: provider.to_string(),
        subject,
        email_verified: email_verified && email.is_some(),
        email,
        name: name.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oidc_claims() {
        let claims = map_claims(
            "google",
            ClaimProfile::Oidc,
            &json!({"sub": "1234", "email": "a@example.com", "email_verified": true, "name": "A"}),
        )
        .unwrap();

        assert_eq!(claims.provider, "google");
        assert_eq!(claims.subject, "1234");
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert!(claims.email_verified);
        assert_eq!(claims.name.as_deref(), Some("A"));
    }

    #[test]
    fn kakao_numeric_id_and_nested_profile() {
        let claims = map_claims(
            "kakao",
            ClaimProfile::Kakao,
            &json!({
                "id": 123456789,
                "properties": {"nickname": "cocktail"},
                "kakao_account": {
                    "email": "k@example.com",
                    "is_email_valid": true,
                    "is_email_verified": true
                }
            }),
        )
        .unwrap();

        assert_eq!(claims.subject, "123456789");
        assert_eq!(claims.name.as_deref(), Some("cocktail"));
        assert!(claims.email_verified);
    }

    #[test]
    fn naver_email_is_never_verified() {
        let claims = map_claims(
            "naver",
            ClaimProfile::Naver,
            &json!({"resultcode": "00", "response": {"id": "nv-1", "email": "n@example.com", "nickname": "n"}}),
        )
        .unwrap();

        assert_eq!(claims.subject, "nv-1");
        assert_eq!(claims.email.as_deref(), Some("n@example.com"));
        assert!(!claims.email_verified);
    }

    #[test]
    fn stringly_verified_flag_and_missing_email() {
        let claims = map_claims(
            "corp",
            ClaimProfile::Oidc,
            &json!({"sub": "x", "email_verified": "true"}),
        )
        .unwrap();
        assert_eq!(claims.email, None);
        assert!(!claims.email_verified);
    }

    #[test]
    fn missing_subject_is_a_provider_error() {
        for payload in [json!({}), json!({"sub": ""}), json!({"sub": null})] {
            assert_eq!(
                map_claims("google", ClaimProfile::Oidc, &payload),
                Err(AuthError::ProviderError)
            );
        }
    }

    #[test]
    fn presets_cover_known_providers() {
        assert!(preset("google").is_some_and(|p| p.jwks_url.is_some()));
        assert!(preset("kakao").is_some_and(|p| p.profile == ClaimProfile::Kakao));
        assert!(preset("naver").is_some_and(|p| !p.pkce));
        assert!(preset("github").is_none());
        assert_eq!(ClaimProfile::parse("NAVER"), Some(ClaimProfile::Naver));
    }
}
