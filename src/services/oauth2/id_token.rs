//! OIDC id-token verification against a provider's JWKS.
use jsonwebtoken::{Algorithm, DecodingKey, Validation, jwk::JwkSet};
use serde_json::Value;
use thiserror::Error;

use crate::services::oauth2::provider::ProviderConfig;

const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::ES256, Algorithm::EdDSA];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdTokenError {
    #[error("unreadable id token header")]
    Header,
    #[error("id token algorithm {0:?} not accepted")]
    Algorithm(Algorithm),
    #[error("no JWKS key for id token (kid {0:?})")]
    UnknownKey(Option<String>),
    #[error("unusable JWKS key: {0}")]
    Key(String),
    #[error("no accepted issuer configured")]
    NoIssuer,
    #[error("id token rejected: {0}")]
    Rejected(String),
    #[error("id token nonce mismatch")]
    Nonce,
}

/// Verifies signature, `iss`, `aud == client_id`, `exp` and (when given) `nonce`, and
/// returns the claim set.
pub fn verify_id_token(
    raw: &str,
    jwks: &JwkSet,
    provider: &ProviderConfig,
    expected_nonce: Option<&str>,
) -> Result<Value, IdTokenError> {
    let header = jsonwebtoken::decode_header(raw).map_err(|_| IdTokenError::Header)?;
    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        return Err(IdTokenError::Algorithm(header.alg));
    }

    let jwk = match header.kid.as_deref() {
        Some(kid) => jwks.find(kid),
        // Without a kid, only an unambiguous key set is usable.
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| IdTokenError::UnknownKey(header.kid.clone()))?;

    let key = DecodingKey::from_jwk(jwk).map_err(|e| IdTokenError::Key(e.to_string()))?;

    if provider.issuers.is_empty() {
        return Err(IdTokenError::NoIssuer);
    }
    let mut validation = Validation::new(header.alg);
    validation.set_issuer(provider.issuers.as_slice());
    validation.set_audience(&[provider.client_id.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

    let claims = jsonwebtoken::decode::<Value>(raw, &key, &validation)
        .map_err(|e| IdTokenError::Rejected(format!("{:?}", e.kind())))?
        .claims;

    if let Some(expected) = expected_nonce
        && claims.get("nonce").and_then(Value::as_str) != Some(expected)
    {
        return Err(IdTokenError::Nonce);
    }

    Ok(claims)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::auth::test_support::{KEY_A_PRIVATE, KEY_B_JWK_X, KEY_B_PRIVATE};
    use crate::services::oauth2::provider::{ClaimProfile, ProviderConfig};
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    pub(crate) const ISSUER: &str = "https://idp.test";
    pub(crate) const CLIENT_ID: &str = "client-1";

    pub(crate) fn provider() -> ProviderConfig {
        ProviderConfig {
            name: "corp".to_string(),
            client_id: CLIENT_ID.to_string(),
            client_secret: "secret".to_string(),
            authorize_url: "https://idp.test/authorize".parse().unwrap(),
            token_url: "https://idp.test/token".parse().unwrap(),
            userinfo_url: Some("https://idp.test/userinfo".parse().unwrap()),
            jwks_url: Some("https://idp.test/jwks".parse().unwrap()),
            issuers: vec![ISSUER.to_string()],
            scopes: vec!["openid".to_string(), "email".to_string()],
            redirect_uri: "https://app.test/api/v1/oauth2/corp/callback"
                .parse()
                .unwrap(),
            profile: ClaimProfile::Oidc,
            pkce: true,
        }
    }

    pub(crate) fn jwks() -> JwkSet {
        serde_json::from_value(json!({
            "keys": [{
                "kty": "OKP",
                "crv": "Ed25519",
                "x": KEY_B_JWK_X,
                "kid": "kb",
                "alg": "EdDSA",
                "use": "sig"
            }]
        }))
        .unwrap()
    }

    pub(crate) fn sign(claims: &Value, kid: Option<&str>, private_pem: &str) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(
            &header,
            claims,
            &EncodingKey::from_ed_pem(private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    pub(crate) fn id_token_claims(nonce: &str) -> Value {
        json!({
            "iss": ISSUER,
            "aud": CLIENT_ID,
            "sub": "corp-42",
            "exp": chrono::Utc::now().timestamp() + 300,
            "iat": chrono::Utc::now().timestamp(),
            "nonce": nonce,
            "email": "bob@example.com",
            "email_verified": true,
            "name": "Bob"
        })
    }

    #[test]
    fn valid_id_token_yields_claims() {
        let raw = sign(&id_token_claims("n-1"), Some("kb"), KEY_B_PRIVATE);
        let claims = verify_id_token(&raw, &jwks(), &provider(), Some("n-1")).unwrap();
        assert_eq!(claims["sub"], "corp-42");
    }

    #[test]
    fn single_key_set_is_used_without_kid() {
        let raw = sign(&id_token_claims("n-1"), None, KEY_B_PRIVATE);
        assert!(verify_id_token(&raw, &jwks(), &provider(), Some("n-1")).is_ok());
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let raw = sign(&id_token_claims("n-1"), Some("kb"), KEY_B_PRIVATE);
        assert_eq!(
            verify_id_token(&raw, &jwks(), &provider(), Some("n-2")),
            Err(IdTokenError::Nonce)
        );
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let raw = sign(&id_token_claims("n-1"), Some("kb"), KEY_A_PRIVATE);
        assert!(matches!(
            verify_id_token(&raw, &jwks(), &provider(), Some("n-1")),
            Err(IdTokenError::Rejected(_))
        ));
    }

    #[test]
    fn unknown_kid_is_rejected() {
        let raw = sign(&id_token_claims("n-1"), Some("other"), KEY_B_PRIVATE);
        assert_eq!(
            verify_id_token(&raw, &jwks(), &provider(), Some("n-1")),
            Err(IdTokenError::UnknownKey(Some("other".to_string())))
        );
    }

    #[test]
    fn audience_issuer_and_expiry_are_enforced() {
        let mut wrong_aud = id_token_claims("n-1");
        wrong_aud["aud"] = json!("someone-else");
        let mut wrong_iss = id_token_claims("n-1");
        wrong_iss["iss"] = json!("https://evil.test");
        let mut expired = id_token_claims("n-1");
        expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);

        for claims in [wrong_aud, wrong_iss, expired] {
            let raw = sign(&claims, Some("kb"), KEY_B_PRIVATE);
            assert!(matches!(
                verify_id_token(&raw, &jwks(), &provider(), Some("n-1")),
                Err(IdTokenError::Rejected(_))
            ));
        }
    }

    #[test]
    fn symmetric_algorithms_are_not_accepted() {
        let raw = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &id_token_claims("n-1"),
            &EncodingKey::from_secret(b"client-secret"),
        )
        .unwrap();
        assert_eq!(
            verify_id_token(&raw, &jwks(), &provider(), Some("n-1")),
            Err(IdTokenError::Algorithm(Algorithm::HS256))
        );
    }
}
