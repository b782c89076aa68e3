//! Access token codec: EdDSA (Ed25519) signed JWTs, compact `header.claims.signature` form.
//!
//! - `issue` embeds subject, roles, realm, `iat`, `exp` and a fresh `jti`.
//! - `validate` checks structure, signature (current key, or the previous key inside its
//!   grace window) and expiry. It never consults the session cache.
//! - The key ring is process-wide and only ever replaced as a whole (`rotate`).
use std::{sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::error::AppError;
use crate::services::auth::{AuthError, Principal, Realm};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    iss: String,
    aud: String,
    sub: String,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    roles: Vec<String>,
    realm: Realm,
}

/// A token freshly minted by `TokenCodec::issue`.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub token_id: Uuid,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Validated token contents, in application types.
#[derive(Debug, Clone)]
pub struct VerifiedAccessToken {
    pub principal: Principal,
    pub token_id: Uuid,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Short, stable key id derived from the SPKI body of a public key PEM.
pub fn key_id(public_key_pem: &str) -> String {
    let body: String = public_key_pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .flat_map(|l| l.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    let digest = Sha256::digest(body.as_bytes());
    hex::encode(&digest[..8])
}

// `now + seconds` as a JWT NumericDate; `None` when it does not fit in an i64.
fn seconds_after(now: i64, seconds: u64) -> Option<i64> {
    i64::try_from(seconds).ok().and_then(|s| now.checked_add(s))
}

/// Active signing key plus its public half.
///
/// Key material is intentionally not printable via Debug.
#[derive(Clone)]
pub struct SigningKeyPair {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// `private_key_pem` must be an Ed25519 private key in PKCS#8 PEM format and
    /// `public_key_pem` its SPKI public key. A mismatched pair is a configuration error.
    pub fn from_pem(private_key_pem: &str, public_key_pem: &str) -> Result<Self, ConfigError> {
        let encoding = EncodingKey::from_ed_pem(private_key_pem.as_bytes()).map_err(|e| {
            ConfigError::InvalidKey {
                name: "ACCESS_JWT_PRIVATE_KEY",
                reason: e.to_string(),
            }
        })?;
        let decoding = DecodingKey::from_ed_pem(public_key_pem.as_bytes()).map_err(|e| {
            ConfigError::InvalidKey {
                name: "ACCESS_JWT_PUBLIC_KEY",
                reason: e.to_string(),
            }
        })?;

        let pair = Self {
            kid: key_id(public_key_pem),
            encoding,
            decoding,
        };
        pair.check_pair()?;
        Ok(pair)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    // Sign a throwaway token and verify it with the public half.
    fn check_pair(&self) -> Result<(), ConfigError> {
        #[derive(Clone, Serialize, Deserialize)]
        struct PairCheck {
            kid: String,
        }

        let mismatch = |reason: String| ConfigError::InvalidKey {
            name: "ACCESS_JWT_PUBLIC_KEY",
            reason,
        };

        let sample = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &PairCheck {
                kid: self.kid.clone(),
            },
            &self.encoding,
        )
        .map_err(|e| mismatch(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<PairCheck>(&sample, &self.decoding, &validation)
            .map(|_| ())
            .map_err(|_| mismatch("public key does not match private key".to_string()))
    }
}

/// A public key kept for validation only, until `usable_until` (unix seconds).
#[derive(Clone)]
struct RetiredKey {
    kid: String,
    decoding: DecodingKey,
    usable_until: i64,
}

struct KeyRing {
    current: SigningKeyPair,
    previous: Option<RetiredKey>,
}

impl KeyRing {
    // Candidate keys for a token header `kid`, newest first.
    fn candidates(&self, kid: Option<&str>, now: i64) -> Vec<&DecodingKey> {
        let previous = self
            .previous
            .as_ref()
            .filter(|p| now <= p.usable_until);

        match kid {
            Some(kid) if kid == self.current.kid => vec![&self.current.decoding],
            Some(kid) => previous
                .filter(|p| p.kid == kid)
                .map(|p| vec![&p.decoding])
                .unwrap_or_default(),
            None => {
                let mut keys = vec![&self.current.decoding];
                keys.extend(previous.map(|p| &p.decoding));
                keys
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodecSettings {
    pub issuer: String,
    pub audience: String,
    pub leeway_seconds: u64,
    // How long a rotated-out key keeps validating tokens.
    pub previous_key_grace_seconds: u64,
}

pub struct TokenCodec {
    keys: RwLock<Arc<KeyRing>>,
    validation: Validation,
    settings: CodecSettings,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("TokenCodec")
            .field("settings", &self.settings)
            .field("current_kid", &self.current_kid())
            .finish()
    }
}

impl TokenCodec {
    /// `previous_public_key_pem` (optional) keeps validating tokens signed before the last
    /// rotation for `previous_key_grace_seconds` from startup.
    pub fn new(
        current: SigningKeyPair,
        previous_public_key_pem: Option<&str>,
        settings: CodecSettings,
    ) -> Result<Self, ConfigError> {
        let now = chrono::Utc::now().timestamp();

        let previous = previous_public_key_pem
            .map(|pem| {
                DecodingKey::from_ed_pem(pem.as_bytes())
                    .map(|decoding| RetiredKey {
                        kid: key_id(pem),
                        decoding,
                        usable_until: seconds_after(now, settings.previous_key_grace_seconds)
                            .unwrap_or(i64::MAX),
                    })
                    .map_err(|e| ConfigError::InvalidKey {
                        name: "ACCESS_JWT_PREVIOUS_PUBLIC_KEY",
                        reason: e.to_string(),
                    })
            })
            .transpose()?;

        // Expiry is checked by `validate_at` against an explicit clock, so jsonwebtoken
        // only verifies signature, presence of the registered claims, iss and aud.
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_audience(&[settings.audience.as_str()]);

        Ok(Self {
            keys: RwLock::new(Arc::new(KeyRing { current, previous })),
            validation,
            settings,
        })
    }

    pub fn current_kid(&self) -> String {
        self.keys.read().current.kid.clone()
    }

    /// Replace the signing key. The outgoing key keeps validating for the grace window.
    ///
    /// Returns `false` when `next` is the key already in use.
    pub fn rotate(&self, next: SigningKeyPair, now: i64) -> bool {
        let mut guard = self.keys.write();
        if guard.current.kid == next.kid {
            return false;
        }

        let retired = RetiredKey {
            kid: guard.current.kid.clone(),
            decoding: guard.current.decoding.clone(),
            usable_until: seconds_after(now, self.settings.previous_key_grace_seconds)
                .unwrap_or(i64::MAX),
        };
        info!(
            previous_kid = %retired.kid,
            current_kid = %next.kid,
            usable_until = retired.usable_until,
            "rotated access token signing key"
        );
        *guard = Arc::new(KeyRing {
            current: next,
            previous: Some(retired),
        });
        true
    }

    pub fn issue(&self, principal: &Principal, ttl: Duration) -> Result<IssuedToken, AppError> {
        self.issue_at(principal, ttl, chrono::Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        principal: &Principal,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedToken, AppError> {
        let expires_at = seconds_after(now, ttl.as_secs()).ok_or_else(|| {
            error!(ttl_seconds = ttl.as_secs(), "access token expiry out of range");
            AppError::Internal
        })?;
        let ring = self.keys.read().clone();
        let token_id = Uuid::new_v4();

        let claims = AccessTokenClaims {
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            sub: principal.id.to_string(),
            iat: now,
            exp: expires_at,
            jti: token_id.to_string(),
            name: principal.name.clone(),
            roles: principal.roles.clone(),
            realm: principal.realm.clone(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(ring.current.kid.clone());

        let raw = jsonwebtoken::encode(&header, &claims, &ring.current.encoding).map_err(|e| {
            error!(error = %e, "failed to sign access token");
            AppError::Internal
        })?;

        Ok(IssuedToken {
            raw,
            token_id,
            issued_at: now,
            expires_at,
        })
    }

    pub fn validate(&self, raw: &str) -> Result<VerifiedAccessToken, AuthError> {
        self.validate_at(raw, chrono::Utc::now().timestamp())
    }

    pub fn validate_at(&self, raw: &str, now: i64) -> Result<VerifiedAccessToken, AuthError> {
        // 1) Structure: three non-empty segments, decodable header and claims. Anything
        //    that fails after this point can only be the signature or the claim values.
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(AuthError::Malformed);
        }
        let header = jsonwebtoken::decode_header(raw).map_err(|_| AuthError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|_| AuthError::Malformed)?;
        if !serde_json::from_slice::<serde_json::Value>(&payload).is_ok_and(|v| v.is_object()) {
            return Err(AuthError::Malformed);
        }

        if header.alg != Algorithm::EdDSA {
            return Err(AuthError::SignatureInvalid);
        }

        // 2) Signature under the current key, or the previous one within its grace window.
        let ring = self.keys.read().clone();
        let candidates = ring.candidates(header.kid.as_deref(), now);
        if candidates.is_empty() {
            return Err(AuthError::SignatureInvalid);
        }

        let mut last_err = AuthError::SignatureInvalid;
        let mut claims = None;
        for key in candidates {
            match jsonwebtoken::decode::<AccessTokenClaims>(raw, key, &self.validation) {
                Ok(data) => {
                    claims = Some(data.claims);
                    break;
                }
                Err(e) => last_err = classify(e.kind()),
            }
        }
        let claims = claims.ok_or(last_err)?;

        // 3) Expiry against the caller's clock.
        let deadline = seconds_after(claims.exp, self.settings.leeway_seconds).unwrap_or(i64::MAX);
        if now >= deadline {
            return Err(AuthError::Expired);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Malformed)?;
        let token_id = Uuid::parse_str(&claims.jti).map_err(|_| AuthError::Malformed)?;

        Ok(VerifiedAccessToken {
            principal: Principal {
                id: user_id,
                name: claims.name,
                roles: claims.roles,
                realm: claims.realm,
                active: true,
            },
            token_id,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        // Header and claims already decoded, so a base64 failure is the signature segment.
        ErrorKind::InvalidSignature
        | ErrorKind::Base64(_)
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::MissingAlgorithm => AuthError::SignatureInvalid,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::test_support::{
        KEY_A_PRIVATE, KEY_A_PUBLIC, KEY_B_PRIVATE, KEY_B_PUBLIC, alice, codec, settings,
    };

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn issued_token_validates_before_expiry() {
        let codec = codec();
        let t = 1_700_000_000;
        let issued = codec.issue_at(&alice(), HOUR, t).unwrap();

        let verified = codec.validate_at(&issued.raw, t + 10).unwrap();
        assert_eq!(verified.principal.id, alice().id);
        assert_eq!(verified.principal.name, "alice");
        assert_eq!(verified.principal.roles, vec!["USER".to_string()]);
        assert_eq!(verified.principal.realm, Realm::Local);
        assert_eq!(verified.token_id, issued.token_id);
        assert_eq!(verified.expires_at, t + 3600);
    }

    #[test]
    fn token_is_expired_after_its_expiry() {
        let codec = codec();
        let t = 1_700_000_000;
        let issued = codec.issue_at(&alice(), HOUR, t).unwrap();

        assert_eq!(
            codec.validate_at(&issued.raw, t + 3601).unwrap_err(),
            AuthError::Expired
        );
        assert_eq!(
            codec.validate_at(&issued.raw, t + 3600).unwrap_err(),
            AuthError::Expired
        );
    }

    #[test]
    fn wall_clock_validation_accepts_fresh_tokens() {
        let codec = codec();
        let issued = codec.issue(&alice(), HOUR).unwrap();
        assert!(codec.validate(&issued.raw).is_ok());
    }

    #[test]
    fn altered_signature_is_rejected() {
        let codec = codec();
        let t = 1_700_000_000;
        let issued = codec.issue_at(&alice(), HOUR, t).unwrap();

        let (signing_input, signature) = issued.raw.rsplit_once('.').unwrap();
        let mut sig: Vec<char> = signature.chars().collect();
        sig[0] = if sig[0] == 'A' { 'B' } else { 'A' };
        let tampered = format!("{signing_input}.{}", sig.into_iter().collect::<String>());

        assert_eq!(
            codec.validate_at(&tampered, t + 10).unwrap_err(),
            AuthError::SignatureInvalid
        );
    }

    #[test]
    fn altered_claims_are_rejected() {
        let codec = codec();
        let t = 1_700_000_000;
        let issued = codec.issue_at(&alice(), HOUR, t).unwrap();
        let parts: Vec<&str> = issued.raw.split('.').collect();

        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        claims["roles"] = serde_json::json!(["ADMIN"]);
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
            parts[2]
        );

        assert_eq!(
            codec.validate_at(&forged, t + 10).unwrap_err(),
            AuthError::SignatureInvalid
        );
    }

    #[test]
    fn structurally_broken_tokens_are_malformed() {
        let codec = codec();
        for raw in ["", "abc", "a.b", "a..c", "not.a.jwt", "a.b.c.d"] {
            assert_eq!(
                codec.validate_at(raw, 0).unwrap_err(),
                AuthError::Malformed,
                "{raw}"
            );
        }
    }

    #[test]
    fn token_for_another_audience_is_malformed() {
        let t = 1_700_000_000;
        let mut other = settings();
        other.audience = "someone-else".to_string();
        let foreign = TokenCodec::new(
            SigningKeyPair::from_pem(KEY_A_PRIVATE, KEY_A_PUBLIC).unwrap(),
            None,
            other,
        )
        .unwrap();
        let issued = foreign.issue_at(&alice(), HOUR, t).unwrap();

        assert_eq!(
            codec().validate_at(&issued.raw, t + 10).unwrap_err(),
            AuthError::Malformed
        );
    }

    #[test]
    fn token_signed_by_unknown_key_is_rejected() {
        let t = 1_700_000_000;
        let stranger = TokenCodec::new(
            SigningKeyPair::from_pem(KEY_B_PRIVATE, KEY_B_PUBLIC).unwrap(),
            None,
            settings(),
        )
        .unwrap();
        let issued = stranger.issue_at(&alice(), HOUR, t).unwrap();

        assert_eq!(
            codec().validate_at(&issued.raw, t + 10).unwrap_err(),
            AuthError::SignatureInvalid
        );
    }

    #[test]
    fn rotation_keeps_previous_key_for_grace_window() {
        let codec = codec();
        let t = chrono::Utc::now().timestamp();
        let old = codec.issue_at(&alice(), HOUR, t).unwrap();

        let next = SigningKeyPair::from_pem(KEY_B_PRIVATE, KEY_B_PUBLIC).unwrap();
        assert!(codec.rotate(next.clone(), t));
        assert!(!codec.rotate(next, t));
        assert_eq!(codec.current_kid(), key_id(KEY_B_PUBLIC));

        // Old token still valid inside the grace window; new tokens use the new key.
        assert!(codec.validate_at(&old.raw, t + 10).is_ok());
        let fresh = codec.issue_at(&alice(), HOUR, t).unwrap();
        assert!(codec.validate_at(&fresh.raw, t + 10).is_ok());

        // Grace window (settings(): 3600s) elapsed, previous key no longer accepted.
        let long_lived = {
            let ring = codec.keys.read().clone();
            assert!(ring.previous.is_some());
            ring.previous.as_ref().unwrap().usable_until
        };
        assert_eq!(
            codec.validate_at(&old.raw, long_lived + 1).unwrap_err(),
            AuthError::SignatureInvalid
        );
    }

    #[test]
    fn configured_previous_key_validates_tokens_from_before_restart() {
        let t = chrono::Utc::now().timestamp();
        let before = TokenCodec::new(
            SigningKeyPair::from_pem(KEY_B_PRIVATE, KEY_B_PUBLIC).unwrap(),
            None,
            settings(),
        )
        .unwrap();
        let old = before.issue_at(&alice(), HOUR, t).unwrap();

        let after = TokenCodec::new(
            SigningKeyPair::from_pem(KEY_A_PRIVATE, KEY_A_PUBLIC).unwrap(),
            Some(KEY_B_PUBLIC),
            settings(),
        )
        .unwrap();
        assert!(after.validate_at(&old.raw, t + 10).is_ok());
    }

    #[test]
    fn expiry_beyond_numeric_date_range_is_refused() {
        let codec = codec();
        let t = 1_700_000_000;

        assert!(matches!(
            codec.issue_at(&alice(), Duration::from_secs(u64::MAX), t),
            Err(AppError::Internal)
        ));
        assert!(matches!(
            codec.issue_at(&alice(), Duration::from_secs(i64::MAX as u64), t),
            Err(AppError::Internal)
        ));
    }

    #[test]
    fn unbounded_grace_window_does_not_overflow() {
        let settings = CodecSettings {
            previous_key_grace_seconds: u64::MAX,
            ..settings()
        };
        let t = chrono::Utc::now().timestamp();
        let codec = TokenCodec::new(
            SigningKeyPair::from_pem(KEY_A_PRIVATE, KEY_A_PUBLIC).unwrap(),
            Some(KEY_B_PUBLIC),
            settings,
        )
        .unwrap();
        let old = codec.issue_at(&alice(), HOUR, t).unwrap();

        let next = SigningKeyPair::from_pem(KEY_B_PRIVATE, KEY_B_PUBLIC).unwrap();
        assert!(codec.rotate(next, t));
        assert!(codec.validate_at(&old.raw, t + 10).is_ok());
    }

    #[test]
    fn mismatched_key_pair_is_a_configuration_error() {
        let err = SigningKeyPair::from_pem(KEY_A_PRIVATE, KEY_B_PUBLIC).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey { .. }));

        let err = SigningKeyPair::from_pem("not a pem", KEY_A_PUBLIC).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey { .. }));
    }

    #[test]
    fn key_id_ignores_pem_formatting() {
        let reflowed = KEY_A_PUBLIC.replace('\n', "\r\n");
        assert_eq!(key_id(KEY_A_PUBLIC), key_id(&reflowed));
        assert_ne!(key_id(KEY_A_PUBLIC), key_id(KEY_B_PUBLIC));
        assert_eq!(key_id(KEY_A_PUBLIC).len(), 16);
    }
}
