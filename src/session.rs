//! Login, refresh and logout.
//!
//! A session is the chain of refresh tokens descending from one login. Each
//! refresh rotates the chain forward; logout revokes its current link.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AuthSettings;
use crate::db::{Database, MembershipDetail, User};
use crate::error::AuthError;
use crate::jwt::{AccessClaims, IssuedToken, TokenCodec, TokenType};
use crate::tokens::{ClientInfo, RefreshTokenStore};

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub memberships: Vec<MembershipDetail>,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Clone)]
pub struct AuthSessionManager {
    db: Database,
    codec: Arc<TokenCodec>,
    refresh_tokens: RefreshTokenStore,
    settings: Arc<AuthSettings>,
}

impl AuthSessionManager {
    pub fn new(
        db: Database,
        codec: Arc<TokenCodec>,
        refresh_tokens: RefreshTokenStore,
        settings: Arc<AuthSettings>,
    ) -> Self {
        Self {
            db,
            codec,
            refresh_tokens,
            settings,
        }
    }

    /// Check credentials and start a session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let Some(user) = self.db.users().authenticate(email, password).await? else {
            warn!(email = %email, "Login failed: invalid credentials");
            return Err(AuthError::unauthorized("Invalid email or password"));
        };
        if !user.is_active {
            warn!(email = %email, user_id = %user.uuid, "Login failed: inactive account");
            return Err(AuthError::unauthorized("User account is disabled"));
        }

        let access = self.issue_access(&user).await?;
        let refresh = self.refresh_tokens.create(&user, client).await?;
        let memberships = self.db.organizations().list_memberships(user.id).await?;

        info!(user_id = %user.uuid, jti = %refresh.jti, "Login succeeded");
        Ok(LoginOutcome {
            user,
            memberships,
            access,
            refresh,
        })
    }

    /// Rotate a refresh token and issue a fresh access token.
    ///
    /// Token errors and `TokenReuseDetected` are returned unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.decode_refresh(refresh_token)?;

        let Some(user) = self.db.users().get_by_uuid(&claims.body.user_id).await? else {
            warn!(user_id = %claims.body.user_id, "Refresh for unknown user");
            return Err(AuthError::unauthorized("User not found"));
        };

        if !user.is_active {
            warn!(user_id = %user.uuid, "Refresh for inactive account");
            return Err(AuthError::unauthorized("User account is disabled"));
        }

        let refresh = self.refresh_tokens.rotate(&claims.jti, &user).await?;
        let access = self.issue_access(&user).await?;
        Ok(TokenPair { access, refresh })
    }

    /// End the session of `refresh_token`, if it is present and decodable.
    ///
    /// Never fails. Revocation errors are logged and swallowed.
    pub async fn logout(&self, refresh_token: Option<&str>) {
        let Some(token) = refresh_token else {
            return;
        };
        let claims = match self.codec.decode_refresh(token) {
            Ok(claims) => claims,
            Err(e) => {
                info!(error = %e, "Logout with unusable refresh token");
                return;
            }
        };
        match self.refresh_tokens.revoke(&claims.jti).await {
            Ok(()) => info!(user_id = %claims.body.user_id, jti = %claims.jti, "Logged out"),
            Err(e) => warn!(jti = %claims.jti, error = %e, "Failed to revoke refresh token on logout"),
        }
    }

    /// Access claims come from the user's first active membership.
    async fn issue_access(&self, user: &User) -> Result<IssuedToken, AuthError> {
        let membership = self
            .db
            .organizations()
            .get_active_membership(user.id)
            .await?;

        let (organization_id, roles) = match membership {
            Some(m) => (Some(m.organization_uuid), vec![m.role_name]),
            None => (None, Vec::new()),
        };

        let claims = AccessClaims {
            user_id: user.uuid.clone(),
            organization_id,
            roles,
            token_type: TokenType::Access,
        };
        Ok(self
            .codec
            .issue_access(&claims, self.settings.access_lifetime)?)
    }
}
