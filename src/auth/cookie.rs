//! Cookie parsing and `Set-Cookie` construction.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

use crate::config::CookieSettings;
use crate::jwt::IssuedToken;

const CSRF_TOKEN_BYTES: usize = 32;

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// A `Set-Cookie` value. `max_age` of `None` makes a session cookie.
pub fn build_cookie(
    settings: &CookieSettings,
    name: &str,
    value: &str,
    max_age: Option<Duration>,
    http_only: bool,
) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; SameSite={}",
        name,
        value,
        settings.path,
        settings.same_site.as_str()
    );
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
    }
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if settings.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// A `Set-Cookie` value that deletes `name`.
pub fn clear_cookie(settings: &CookieSettings, name: &str, http_only: bool) -> String {
    build_cookie(settings, name, "", Some(Duration::ZERO), http_only)
}

pub fn access_cookie(settings: &CookieSettings, token: &IssuedToken) -> String {
    build_cookie(
        settings,
        &settings.access_name,
        &token.token,
        Some(token.lifetime),
        true,
    )
}

pub fn refresh_cookie(settings: &CookieSettings, token: &IssuedToken) -> String {
    build_cookie(
        settings,
        &settings.refresh_name,
        &token.token,
        Some(token.lifetime),
        true,
    )
}

/// Readable by scripts so it can be echoed back in the `X-CSRFToken` header.
pub fn csrf_cookie(settings: &CookieSettings, token: &str) -> String {
    build_cookie(settings, &settings.csrf_name, token, None, false)
}

/// Deletions for the access, refresh and CSRF cookies.
pub fn clear_auth_cookies(settings: &CookieSettings) -> [String; 3] {
    [
        clear_cookie(settings, &settings.access_name, true),
        clear_cookie(settings, &settings.refresh_name, true),
        clear_cookie(settings, &settings.csrf_name, false),
    ]
}

/// Random URL-safe token for double-submit CSRF protection.
pub fn new_csrf_token() -> String {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Append `Set-Cookie` headers, skipping any value that is not a valid header.
pub fn append_cookies<I, S>(headers: &mut HeaderMap, cookies: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie.as_ref()) {
            headers.append(header::SET_COOKIE, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("access_token=abc123"));

        assert_eq!(get_cookie(&headers, "access_token"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("csrftoken=tok; access_token=abc123; refresh_token=xyz789"),
        );

        assert_eq!(get_cookie(&headers, "access_token"), Some("abc123"));
        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "csrftoken"), Some("tok"));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        assert_eq!(get_cookie(&HeaderMap::new(), "access_token"), None);
    }

    #[test]
    fn test_build_cookie_attributes() {
        let settings = CookieSettings::default();
        let cookie = build_cookie(&settings, "access_token", "v", Some(Duration::from_secs(300)), true);
        assert_eq!(
            cookie,
            "access_token=v; Path=/; SameSite=Lax; Max-Age=300; HttpOnly; Secure"
        );

        let insecure = CookieSettings {
            secure: false,
            same_site: SameSite::Strict,
            ..CookieSettings::default()
        };
        assert_eq!(
            csrf_cookie(&insecure, "t"),
            "csrftoken=t; Path=/; SameSite=Strict"
        );
    }

    #[test]
    fn test_clear_auth_cookies() {
        let cleared = clear_auth_cookies(&CookieSettings::default());
        assert!(cleared[0].starts_with("access_token=;"));
        assert!(cleared[1].starts_with("refresh_token=;"));
        assert!(cleared[2].starts_with("csrftoken=;"));
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
        assert!(!cleared[2].contains("HttpOnly"));
    }

    #[test]
    fn test_csrf_tokens_are_random() {
        let a = new_csrf_token();
        let b = new_csrf_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
