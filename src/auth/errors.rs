//! Authentication error types.

use axum::response::{IntoResponse, Response};

use super::cookie::{append_cookies, clear_auth_cookies};
use crate::api::Problem;
use crate::config::CookieSettings;

/// Internal auth error kind used by the extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    ExpiredToken,
    CsrfFailed,
}

/// Extractor rejection. Token failures also clear the auth cookies.
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
    clear_cookies: Option<[String; 3]>,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind, cookies: &CookieSettings) -> Self {
        let clear_cookies = match kind {
            AuthErrorKind::InvalidToken | AuthErrorKind::ExpiredToken => {
                Some(clear_auth_cookies(cookies))
            }
            AuthErrorKind::NotAuthenticated | AuthErrorKind::CsrfFailed => None,
        };
        Self {
            kind,
            clear_cookies,
        }
    }

    fn problem(&self) -> Problem {
        match self.kind {
            AuthErrorKind::NotAuthenticated => Problem::unauthorized("Not authenticated"),
            AuthErrorKind::InvalidToken => Problem::unauthorized("Invalid token"),
            AuthErrorKind::ExpiredToken => Problem::unauthorized("Token has expired"),
            AuthErrorKind::CsrfFailed => Problem::forbidden("CSRF token missing or incorrect"),
        }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let mut response = self.problem().into_response();
        if let Some(cookies) = &self.clear_cookies {
            append_cookies(response.headers_mut(), cookies);
        }
        response
    }
}
