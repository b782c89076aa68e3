/*
 * Responsibility
 * - Browser logins that end on the frontend (FRONTEND_URL)
 * - Token cookies: Set-Cookie rendering and Cookie header parsing
 * - /oauth/success and /oauth/error redirects
 */
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;
use url::Url;

use crate::error::AppError;
use crate::services::auth::token_service::IssuedTokenPair;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes shared by every token cookie. Cookies are always HttpOnly and scoped to `/`.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl CookieSettings {
    pub fn set(&self, name: &str, value: &str, max_age_seconds: u64) -> Result<HeaderValue, AppError> {
        self.render(&format!("{name}={value}; Max-Age={max_age_seconds}"))
    }

    pub fn clear(&self, name: &str) -> Result<HeaderValue, AppError> {
        self.render(&format!(
            "{name}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
        ))
    }

    fn render(&self, head: &str) -> Result<HeaderValue, AppError> {
        let mut cookie = format!("{head}; Path=/; HttpOnly; SameSite={}", self.same_site.as_str());
        if self.secure {
            cookie.push_str("; Secure");
        }
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        HeaderValue::from_str(&cookie).map_err(|e| {
            error!(error = %e, "unrenderable cookie");
            AppError::Internal
        })
    }
}

/// Value of cookie `name`, across all `Cookie` headers. Blank values count as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Where browser logins land, and how the tokens get there.
#[derive(Debug, Clone)]
pub struct FrontendRedirect {
    pub base_url: Url,
    pub cookies: CookieSettings,
}

impl FrontendRedirect {
    fn page(&self, path: &str) -> Result<Url, AppError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}")).map_err(|e| {
            error!(error = %e, "invalid frontend redirect target");
            AppError::Internal
        })
    }

    /// Both tokens as cookies on `response`.
    pub fn attach_tokens(&self, response: &mut Response, pair: &IssuedTokenPair) -> Result<(), AppError> {
        let access = self
            .cookies
            .set(ACCESS_TOKEN_COOKIE, &pair.access_token, pair.expires_in)?;
        let refresh = self.cookies.set(
            REFRESH_TOKEN_COOKIE,
            &pair.refresh_token,
            pair.refresh_expires_in,
        )?;
        let headers = response.headers_mut();
        headers.append(header::SET_COOKIE, access);
        headers.append(header::SET_COOKIE, refresh);
        Ok(())
    }

    pub fn clear_tokens(&self, response: &mut Response) -> Result<(), AppError> {
        let access = self.cookies.clear(ACCESS_TOKEN_COOKIE)?;
        let refresh = self.cookies.clear(REFRESH_TOKEN_COOKIE)?;
        let headers = response.headers_mut();
        headers.append(header::SET_COOKIE, access);
        headers.append(header::SET_COOKIE, refresh);
        Ok(())
    }

    /// 302 to `/oauth/success` carrying the token cookies.
    pub fn login_succeeded(&self, pair: &IssuedTokenPair) -> Result<Response, AppError> {
        let mut response = found(&self.page("/oauth/success")?)?;
        self.attach_tokens(&mut response, pair)?;
        Ok(response)
    }

    /// 302 to `/oauth/error?error=<CODE>`.
    pub fn login_failed(&self, err: &AppError) -> Result<Response, AppError> {
        let mut target = self.page("/oauth/error")?;
        target.query_pairs_mut().append_pair("error", err.code());
        found(&target)
    }
}

fn found(target: &Url) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(target.as_str()).map_err(|_| AppError::Internal)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::test_support::alice;
    use uuid::Uuid;

    fn frontend(base: &str) -> FrontendRedirect {
        FrontendRedirect {
            base_url: Url::parse(base).unwrap(),
            cookies: CookieSettings {
                secure: true,
                same_site: SameSite::Lax,
                domain: None,
            },
        }
    }

    fn pair() -> IssuedTokenPair {
        IssuedTokenPair {
            access_token: "a.b.c".to_string(),
            token_type: "Bearer",
            expires_in: 900,
            refresh_token: "r-1".to_string(),
            refresh_expires_in: 86400,
            token_id: Uuid::nil(),
            principal: alice(),
        }
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn success_redirect_sets_http_only_cookies() {
        let response = frontend("https://app.example.com/").login_succeeded(&pair()).unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://app.example.com/oauth/success"
        );
        assert_eq!(
            set_cookies(&response),
            vec![
                "access_token=a.b.c; Max-Age=900; Path=/; HttpOnly; SameSite=Lax; Secure",
                "refresh_token=r-1; Max-Age=86400; Path=/; HttpOnly; SameSite=Lax; Secure",
            ]
        );
    }

    #[test]
    fn error_redirect_keeps_base_path_and_carries_code() {
        let response = frontend("https://example.com/app")
            .login_failed(&AppError::Auth(crate::services::auth::AuthError::ProviderError))
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com/app/oauth/error?error=PROVIDER_ERROR"
        );
        assert!(set_cookies(&response).is_empty());
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let settings = CookieSettings {
            secure: false,
            same_site: SameSite::Strict,
            domain: Some("example.com".to_string()),
        };
        let cleared = settings.clear(ACCESS_TOKEN_COOKIE).unwrap();
        assert_eq!(
            cleared,
            "access_token=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/; HttpOnly; SameSite=Strict; Domain=example.com"
        );
    }

    #[test]
    fn cookie_lookup() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; access_token=t1"));
        headers.append(header::COOKIE, HeaderValue::from_static("refresh_token="));

        assert_eq!(read_cookie(&headers, ACCESS_TOKEN_COOKIE).as_deref(), Some("t1"));
        assert_eq!(read_cookie(&headers, REFRESH_TOKEN_COOKIE), None);
        assert_eq!(read_cookie(&headers, "missing"), None);
        assert_eq!(SameSite::parse("NONE"), Some(SameSite::None));
        assert_eq!(SameSite::parse("sometimes"), None);
    }
}
