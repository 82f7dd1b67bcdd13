//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{Method, request::Parts},
};

use subtle::ConstantTimeEq;

use super::cookie::get_cookie;
use super::errors::{ApiAuthError, AuthErrorKind};
use super::ip::client_info;
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::jwt::TokenError;
use crate::tokens::ClientInfo;

/// Header carrying the double-submit CSRF token.
pub const CSRF_HEADER: &str = "x-csrftoken";

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Unsafe methods must echo the CSRF cookie in the `X-CSRFToken` header.
fn check_csrf<S: HasAuthBackend>(parts: &Parts, state: &S) -> Result<(), AuthErrorKind> {
    if is_safe_method(&parts.method) {
        return Ok(());
    }
    let cookie = get_cookie(&parts.headers, &state.cookies().csrf_name)
        .filter(|c| !c.is_empty())
        .ok_or(AuthErrorKind::CsrfFailed)?;
    let header = parts
        .headers
        .get(CSRF_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthErrorKind::CsrfFailed)?;
    if !tokens_match(header, cookie) {
        return Err(AuthErrorKind::CsrfFailed);
    }
    Ok(())
}

/// Constant-time for equal lengths; the length itself is not secret.
fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn authenticate_request<S: HasAuthBackend>(
    parts: &Parts,
    state: &S,
) -> Result<AuthenticatedUser, AuthErrorKind> {
    let token = get_cookie(&parts.headers, &state.cookies().access_name)
        .filter(|t| !t.is_empty())
        .ok_or(AuthErrorKind::NotAuthenticated)?;

    let claims = state.codec().decode_access(token).map_err(|e| match e {
        TokenError::Expired => AuthErrorKind::ExpiredToken,
        _ => AuthErrorKind::InvalidToken,
    })?;

    check_csrf(parts, state)?;

    Ok(AuthenticatedUser { claims })
}

/// Extractor for endpoints that require a valid access token.
///
/// Access tokens are stateless: they are not looked up in the database, and
/// a revoked session stays usable until its access token expires.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state)
            .map(Auth)
            .map_err(|kind| ApiAuthError::new(kind, state.cookies()))
    }
}

/// Client IP and user agent of the request. Never fails.
pub struct Client(pub ClientInfo);

impl<S> FromRequestParts<S> for Client
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Client(client_info(parts, state.trust_forwarded_for())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CookieSettings;
    use crate::jwt::{AccessClaims, TokenCodec, TokenType};
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;

    struct TestState {
        codec: TokenCodec,
        cookies: CookieSettings,
    }

    impl HasAuthBackend for TestState {
        fn codec(&self) -> &TokenCodec {
            &self.codec
        }
        fn cookies(&self) -> &CookieSettings {
            &self.cookies
        }
        fn trust_forwarded_for(&self) -> bool {
            true
        }
    }

    fn state(clock: Arc<ManualClock>) -> TestState {
        TestState {
            codec: TokenCodec::new(b"0123456789abcdef0123456789abcdef", "test", clock),
            cookies: CookieSettings::default(),
        }
    }

    fn access_token(state: &TestState) -> String {
        state
            .codec
            .issue_access(
                &AccessClaims {
                    user_id: "u-1".into(),
                    organization_id: None,
                    roles: vec![],
                    token_type: TokenType::Access,
                },
                Duration::from_secs(300),
            )
            .unwrap()
            .token
    }

    fn parts(method: Method, cookie: &str, csrf_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri("/").header("cookie", cookie);
        if let Some(value) = csrf_header {
            builder = builder.header(CSRF_HEADER, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_get_needs_only_access_cookie() {
        let state = state(Arc::new(ManualClock::new(1_000)));
        let token = access_token(&state);
        let parts = parts(Method::GET, &format!("access_token={}", token), None);
        let user = authenticate_request(&parts, &state).unwrap();
        assert_eq!(user.user_id(), "u-1");
    }

    #[test]
    fn test_missing_or_bad_token() {
        let state = state(Arc::new(ManualClock::new(1_000)));
        let parts_missing = parts(Method::GET, "csrftoken=x", None);
        assert_eq!(
            authenticate_request(&parts_missing, &state).unwrap_err(),
            AuthErrorKind::NotAuthenticated
        );
        let parts_bad = parts(Method::GET, "access_token=garbage", None);
        assert_eq!(
            authenticate_request(&parts_bad, &state).unwrap_err(),
            AuthErrorKind::InvalidToken
        );
    }

    #[test]
    fn test_expired_token() {
        let clock = Arc::new(ManualClock::new(1_000));
        let state = state(clock.clone());
        let token = access_token(&state);
        clock.advance(Duration::from_secs(300));
        let parts = parts(Method::GET, &format!("access_token={}", token), None);
        assert_eq!(
            authenticate_request(&parts, &state).unwrap_err(),
            AuthErrorKind::ExpiredToken
        );
    }

    #[test]
    fn test_unsafe_method_requires_matching_csrf() {
        let state = state(Arc::new(ManualClock::new(1_000)));
        let token = access_token(&state);
        let cookie = format!("access_token={}; csrftoken=abc", token);

        let ok = parts(Method::POST, &cookie, Some("abc"));
        assert!(authenticate_request(&ok, &state).is_ok());

        for header in [None, Some("abd"), Some("ab"), Some("abcd"), Some("")] {
            let bad = parts(Method::POST, &cookie, header);
            assert_eq!(
                authenticate_request(&bad, &state).unwrap_err(),
                AuthErrorKind::CsrfFailed
            );
        }

        let no_cookie = parts(Method::DELETE, &format!("access_token={}", token), Some("abc"));
        assert_eq!(
            authenticate_request(&no_cookie, &state).unwrap_err(),
            AuthErrorKind::CsrfFailed
        );
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("a1b2c3", "a1b2c3"));
        assert!(!tokens_match("a1b2c3", "a1b2c4"));
        assert!(!tokens_match("a1b2c3", "a1b2c"));
        assert!(!tokens_match("", "a"));
    }
}
