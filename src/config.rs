/*
 * Responsibility
 * - Read settings from the environment (database, cache, signing keys, OAuth2 providers)
 * - Validate them; anything missing or invalid stops startup
 */
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt};

use url::Url;

use crate::api::v1::frontend::{CookieSettings, FrontendRedirect, SameSite};
use crate::services::auth::{credentials::EmailLinkPolicy, principal::normalize_roles};
use crate::services::oauth2::provider::{self, ClaimProfile, ProviderConfig};

// Ceiling for every lifetime and timeout setting (10 years).
const MAX_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn parse(value: Option<&str>) -> Self {
        match value
            .unwrap_or("development")
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
    // Per-provider variables (`OAUTH2_<NAME>_...`) have computed names.
    MissingVar(String),
    InvalidVar(String),
    InvalidKey { name: &'static str, reason: String },
    KeyFile { path: PathBuf, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
            ConfigError::MissingVar(key) => write!(f, "missing configuration: {}", key),
            ConfigError::InvalidVar(key) => write!(f, "invalid configuration: {}", key),
            ConfigError::InvalidKey { name, reason } => {
                write!(f, "invalid key material in {}: {}", name, reason)
            }
            ConfigError::KeyFile { path, reason } => {
                write!(f, "cannot read key file {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where a PEM comes from. Keys read from files can be reloaded (SIGHUP).
#[derive(Clone)]
pub enum KeySource {
    Inline(String),
    Path(PathBuf),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Inline(_) => f.write_str("Inline(<redacted>)"),
            KeySource::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

impl KeySource {
    pub fn load(&self) -> Result<String, ConfigError> {
        match self {
            KeySource::Inline(pem) => Ok(pem.clone()),
            KeySource::Path(path) => {
                std::fs::read_to_string(path).map_err(|e| ConfigError::KeyFile {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, KeySource::Path(_))
    }
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub cors_allowed_origins: Vec<String>,
    pub public_base_url: Url,

    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    // None: in-memory cache (development only)
    pub valkey_url: Option<String>,

    pub auth_issuer: String,
    pub auth_audience: String,
    pub access_jwt_private_key: KeySource,
    pub access_jwt_public_key: KeySource,
    pub access_jwt_previous_public_key: Option<KeySource>,
    pub previous_key_grace_seconds: u64,
    pub access_token_ttl_seconds: u64,
    pub access_token_leeway_seconds: u64,
    pub refresh_token_ttl_seconds: u64,

    pub session_cache_fail_open: bool,
    pub session_cache_timeout: Duration,
    pub credential_check_timeout: Duration,

    pub federated_email_policy: EmailLinkPolicy,
    pub default_roles: Vec<String>,

    pub oauth2_providers: Vec<ProviderConfig>,
    pub oauth2_state_ttl: Duration,
    pub oauth2_http_timeout: Duration,
    // None: the OAuth2 callback answers with JSON.
    pub frontend: Option<FrontendRedirect>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let port: u16 = vars.parse_or("PORT", 3000)?;
        let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(vars.get("APP_ENV").as_deref());

        let cors_allowed_origins = split_list(&vars.get("CORS_ALLOWED_ORIGINS").unwrap_or_default());

        let public_base_url = vars
            .get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let public_base_url =
            Url::parse(&public_base_url).map_err(|_| ConfigError::Invalid("PUBLIC_BASE_URL"))?;

        let database_url = vars.require("DATABASE_URL")?;
        let database_max_connections = vars.parse_or("DATABASE_MAX_CONNECTIONS", 10u32)?;
        if database_max_connections == 0 {
            return Err(ConfigError::Invalid("DATABASE_MAX_CONNECTIONS"));
        }
        let run_migrations = vars.flag_or("RUN_MIGRATIONS", false)?;

        let valkey_url = vars.get("VALKEY_URL");
        if valkey_url.is_none() && app_env.is_production() {
            return Err(ConfigError::Missing("VALKEY_URL"));
        }

        let auth_issuer = vars.require("AUTH_ISSUER")?;
        let auth_audience = vars.require("AUTH_AUDIENCE")?;

        let access_jwt_private_key = vars
            .key_source("ACCESS_JWT_PRIVATE_KEY_PEM", "ACCESS_JWT_PRIVATE_KEY_PATH")?
            .ok_or(ConfigError::Missing("ACCESS_JWT_PRIVATE_KEY_PEM"))?;
        let access_jwt_public_key = vars
            .key_source("ACCESS_JWT_PUBLIC_KEY_PEM", "ACCESS_JWT_PUBLIC_KEY_PATH")?
            .ok_or(ConfigError::Missing("ACCESS_JWT_PUBLIC_KEY_PEM"))?;
        let access_jwt_previous_public_key = vars.key_source(
            "ACCESS_JWT_PREVIOUS_PUBLIC_KEY_PEM",
            "ACCESS_JWT_PREVIOUS_PUBLIC_KEY_PATH",
        )?;

        let access_token_ttl_seconds = vars.seconds_or("ACCESS_TOKEN_TTL_SECONDS", 3600)?;
        if access_token_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("ACCESS_TOKEN_TTL_SECONDS"));
        }
        let access_token_leeway_seconds = vars.seconds_or("ACCESS_TOKEN_LEEWAY_SECONDS", 0)?;
        let previous_key_grace_seconds =
            vars.seconds_or("ACCESS_JWT_PREVIOUS_KEY_GRACE_SECONDS", access_token_ttl_seconds)?;
        let refresh_token_ttl_seconds = vars.seconds_or("REFRESH_TOKEN_TTL_SECONDS", 2_592_000)?; // 30 days
        if refresh_token_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("REFRESH_TOKEN_TTL_SECONDS"));
        }

        let session_cache_fail_open = vars.flag_or("SESSION_CACHE_FAIL_OPEN", true)?;
        let session_cache_timeout =
            Duration::from_millis(vars.millis_or("SESSION_CACHE_TIMEOUT_MS", 250)?);
        let credential_check_timeout =
            Duration::from_millis(vars.millis_or("CREDENTIAL_CHECK_TIMEOUT_MS", 3000)?);

        let federated_email_policy = match vars.get("FEDERATED_EMAIL_POLICY") {
            Some(v) => EmailLinkPolicy::parse(&v)
                .ok_or(ConfigError::Invalid("FEDERATED_EMAIL_POLICY"))?,
            None => EmailLinkPolicy::Reject,
        };

        let default_roles =
            normalize_roles(split_list(&vars.get("DEFAULT_ROLES").unwrap_or_else(|| "USER".into())));
        if default_roles.is_empty() {
            return Err(ConfigError::Invalid("DEFAULT_ROLES"));
        }

        let mut oauth2_providers: Vec<ProviderConfig> = Vec::new();
        for name in split_list(&vars.get("OAUTH2_PROVIDERS").unwrap_or_default()) {
            let name = name.to_ascii_lowercase();
            if oauth2_providers.iter().any(|p| p.name == name) {
                return Err(ConfigError::Invalid("OAUTH2_PROVIDERS"));
            }
            oauth2_providers.push(vars.provider(&name, &public_base_url)?);
        }

        let oauth2_state_ttl =
            Duration::from_secs(vars.seconds_or("OAUTH2_STATE_TTL_SECONDS", 600)?);
        let oauth2_http_timeout =
            Duration::from_secs(vars.seconds_or("OAUTH2_HTTP_TIMEOUT_SECONDS", 10)?);

        let frontend = vars.frontend()?;

        Ok(Self {
            addr,
            app_env,
            cors_allowed_origins,
            public_base_url,
            database_url,
            database_max_connections,
            run_migrations,
            valkey_url,
            auth_issuer,
            auth_audience,
            access_jwt_private_key,
            access_jwt_public_key,
            access_jwt_previous_public_key,
            previous_key_grace_seconds,
            access_token_ttl_seconds,
            access_token_leeway_seconds,
            refresh_token_ttl_seconds,
            session_cache_fail_open,
            session_cache_timeout,
            credential_check_timeout,
            federated_email_policy,
            default_roles,
            oauth2_providers,
            oauth2_state_ttl,
            oauth2_http_timeout,
            frontend,
        })
    }

    /// SIGHUP reload is only possible when both halves of the signing key come from files.
    pub fn signing_keys_reloadable(&self) -> bool {
        self.access_jwt_private_key.is_file() && self.access_jwt_public_key.is_file()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
            None => Ok(default),
        }
    }

    fn seconds_or(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let seconds = self.parse_or(key, default)?;
        if seconds > MAX_SECONDS {
            return Err(ConfigError::Invalid(key));
        }
        Ok(seconds)
    }

    fn millis_or(&self, key: &'static str, default: u64) -> Result<u64, ConfigError> {
        let millis = self.parse_or(key, default)?;
        if millis > MAX_SECONDS * 1000 {
            return Err(ConfigError::Invalid(key));
        }
        Ok(millis)
    }

    fn flag_or(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(v) => parse_flag(&v).ok_or(ConfigError::Invalid(key)),
            None => Ok(default),
        }
    }

    fn key_source(
        &self,
        pem_key: &'static str,
        path_key: &'static str,
    ) -> Result<Option<KeySource>, ConfigError> {
        match (self.get(pem_key), self.get(path_key)) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(path_key)),
            // Single-line env values carry escaped newlines.
            (Some(pem), None) => Ok(Some(KeySource::Inline(pem.replace("\\n", "\n")))),
            (None, Some(path)) => Ok(Some(KeySource::Path(PathBuf::from(path)))),
            (None, None) => Ok(None),
        }
    }

    fn frontend(&self) -> Result<Option<FrontendRedirect>, ConfigError> {
        let Some(raw) = self.get("FRONTEND_URL") else {
            return Ok(None);
        };
        let base_url = Url::parse(&raw).map_err(|_| ConfigError::Invalid("FRONTEND_URL"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("FRONTEND_URL"));
        }

        let secure = self.flag_or("COOKIE_SECURE", true)?;
        let same_site = match self.get("COOKIE_SAME_SITE") {
            Some(v) => SameSite::parse(&v).ok_or(ConfigError::Invalid("COOKIE_SAME_SITE"))?,
            None => SameSite::Lax,
        };
        // Browsers drop SameSite=None cookies without Secure.
        if same_site == SameSite::None && !secure {
            return Err(ConfigError::Invalid("COOKIE_SAME_SITE"));
        }

        Ok(Some(FrontendRedirect {
            base_url,
            cookies: CookieSettings {
                secure,
                same_site,
                domain: self.get("COOKIE_DOMAIN"),
            },
        }))
    }

    fn provider(&self, name: &str, public_base_url: &Url) -> Result<ProviderConfig, ConfigError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Invalid("OAUTH2_PROVIDERS"));
        }

        let prefix = format!("OAUTH2_{}_", name.to_ascii_uppercase().replace('-', "_"));
        let var = |suffix: &str| format!("{prefix}{suffix}");
        let preset = provider::preset(name);

        let required = |suffix: &str| {
            self.get(&var(suffix))
                .ok_or_else(|| ConfigError::MissingVar(var(suffix)))
        };
        let url = |suffix: &str, fallback: Option<&str>| -> Result<Option<Url>, ConfigError> {
            match self.get(&var(suffix)).as_deref().or(fallback) {
                Some(raw) => Url::parse(raw)
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidVar(var(suffix))),
                None => Ok(None),
            }
        };

        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;

        let authorize_url = url("AUTHORIZE_URL", preset.map(|p| p.authorize_url))?
            .ok_or_else(|| ConfigError::MissingVar(var("AUTHORIZE_URL")))?;
        let token_url = url("TOKEN_URL", preset.map(|p| p.token_url))?
            .ok_or_else(|| ConfigError::MissingVar(var("TOKEN_URL")))?;
        let userinfo_url = url("USERINFO_URL", preset.and_then(|p| p.userinfo_url))?;
        let jwks_url = url("JWKS_URL", preset.and_then(|p| p.jwks_url))?;

        let issuers = match self.get(&var("ISSUER")) {
            Some(raw) => split_list(&raw),
            None => preset
                .map(|p| p.issuers.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        };
        if jwks_url.is_some() && issuers.is_empty() {
            return Err(ConfigError::MissingVar(var("ISSUER")));
        }
        if jwks_url.is_none() && userinfo_url.is_none() {
            return Err(ConfigError::MissingVar(var("USERINFO_URL")));
        }

        let scopes = match self.get(&var("SCOPES")) {
            Some(raw) => raw
                .split([',', ' '])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => match preset {
                Some(p) => p.scopes.iter().map(|s| s.to_string()).collect(),
                None => vec!["openid".into(), "email".into(), "profile".into()],
            },
        };

        let redirect_uri = match self.get(&var("REDIRECT_URI")) {
            Some(raw) => Url::parse(&raw).map_err(|_| ConfigError::InvalidVar(var("REDIRECT_URI")))?,
            None => public_base_url
                .join(&format!("/api/v1/oauth2/{name}/callback"))
                .map_err(|_| ConfigError::Invalid("PUBLIC_BASE_URL"))?,
        };

        let profile = match self.get(&var("PROFILE")) {
            Some(raw) => {
                ClaimProfile::parse(&raw).ok_or_else(|| ConfigError::InvalidVar(var("PROFILE")))?
            }
            None => preset.map(|p| p.profile).unwrap_or(ClaimProfile::Oidc),
        };

        let pkce = match self.get(&var("PKCE")) {
            Some(raw) => parse_flag(&raw).ok_or_else(|| ConfigError::InvalidVar(var("PKCE")))?,
            None => preset.map(|p| p.pkce).unwrap_or(true),
        };

        Ok(ProviderConfig {
            name: name.to_string(),
            client_id,
            client_secret,
            authorize_url,
            token_url,
            userinfo_url,
            jwks_url,
            issuers,
            scopes,
            redirect_uri,
            profile,
            pkce,
        })
    }
}
