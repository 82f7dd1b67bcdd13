//! Authentication user types.

use crate::jwt::{AccessClaims, TokenClaims};

/// Authenticated user information extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Decoded access token, including registered claims
    pub claims: TokenClaims<AccessClaims>,
}

impl AuthenticatedUser {
    /// Public user id (UUID).
    pub fn user_id(&self) -> &str {
        &self.claims.body.user_id
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.claims.body.organization_id.as_deref()
    }
}
