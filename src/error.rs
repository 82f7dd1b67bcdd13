//! Domain error taxonomy shared by every service.

use crate::jwt::TokenError;
use crate::password::HashError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad credentials, inactive account, or a missing token.
    #[error("{0}")]
    Unauthorized(String),

    /// A refresh token was presented that is no longer (or never was) on the
    /// allowlist. Every refresh token of the user has been revoked.
    #[error("refresh token reuse detected")]
    TokenReuseDetected,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    NotFound(String),

    /// A one-time code past its TTL.
    #[error("code has expired")]
    Expired,

    #[error("invalid code")]
    InvalidCode,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error means the presented credentials are unusable and
    /// the client should drop its auth cookies.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthorized(_) | AuthError::TokenReuseDetected | AuthError::Token(_)
        )
    }
}

impl From<HashError> for AuthError {
    fn from(e: HashError) -> Self {
        AuthError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_stay_distinct() {
        let expired: AuthError = TokenError::Expired.into();
        let invalid: AuthError = TokenError::Invalid.into();
        assert!(matches!(expired, AuthError::Token(TokenError::Expired)));
        assert!(matches!(invalid, AuthError::Token(TokenError::Invalid)));
    }

    #[test]
    fn test_invalidates_session() {
        assert!(AuthError::TokenReuseDetected.invalidates_session());
        assert!(AuthError::Token(TokenError::Malformed).invalidates_session());
        assert!(!AuthError::InvalidCode.invalidates_session());
        assert!(!AuthError::rate_limited("slow down").invalidates_session());
    }
}
