//! Refresh token issuance, rotation and reuse detection.
//!
//! Every issued refresh token has a row in the allowlist. Rotating a token
//! retires its row and creates the successor in one transaction. Presenting a
//! token whose row is absent, revoked or expired is treated as a replay of a
//! stolen token: all of the user's refresh tokens are revoked.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::db::{NewRefreshToken, RefreshTokenRecord, TokenStore, User};
use crate::error::AuthError;
use crate::jwt::{IssuedToken, RefreshClaims, TokenCodec, TokenType};

/// Client metadata recorded with a refresh token.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    tokens: TokenStore,
    codec: Arc<TokenCodec>,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenStore {
    pub fn new(
        tokens: TokenStore,
        codec: Arc<TokenCodec>,
        lifetime: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            codec,
            lifetime,
            clock,
        }
    }

    fn sign(&self, user: &User) -> Result<IssuedToken, AuthError> {
        let claims = RefreshClaims {
            user_id: user.uuid.clone(),
            token_type: TokenType::Refresh,
        };
        Ok(self.codec.issue(&claims, self.lifetime, None)?)
    }

    /// Issue a refresh token for `user` and add it to the allowlist.
    pub async fn create(&self, user: &User, client: &ClientInfo) -> Result<IssuedToken, AuthError> {
        let issued = self.sign(user)?;
        self.tokens
            .insert(&NewRefreshToken {
                jti: &issued.jti,
                user_id: user.id,
                created_at: issued.issued_at,
                expires_at: issued.expires_at,
                ip_address: client.ip_address.as_deref(),
                user_agent: client.user_agent.as_deref(),
            })
            .await?;

        info!(user_id = %user.uuid, jti = %issued.jti, "Refresh token issued");
        Ok(issued)
    }

    /// Replace the token `old_jti` with a new one.
    ///
    /// Fails with `TokenReuseDetected` if the old record is absent or no
    /// longer active, after revoking every refresh token of the user.
    pub async fn rotate(&self, old_jti: &str, user: &User) -> Result<IssuedToken, AuthError> {
        let issued = self.sign(user)?;
        let now = self.clock.now();

        let replaced = self
            .tokens
            .replace(old_jti, user.id, now, &issued.jti, issued.expires_at)
            .await?;

        if !replaced {
            let reason = match self.tokens.get_for_user(old_jti, user.id).await? {
                None => "unknown token",
                Some(record) if record.revoked => "token already revoked",
                Some(_) => "token expired",
            };
            let revoked = self.revoke_all(user.id).await?;
            error!(
                user_id = %user.uuid,
                jti = %old_jti,
                reason,
                revoked,
                "Refresh token reuse detected, all refresh tokens revoked"
            );
            return Err(AuthError::TokenReuseDetected);
        }

        info!(user_id = %user.uuid, old_jti = %old_jti, jti = %issued.jti, "Refresh token rotated");
        Ok(issued)
    }

    /// Revoke one token. Absent or already revoked tokens are not an error.
    pub async fn revoke(&self, jti: &str) -> Result<(), AuthError> {
        if self.tokens.revoke(jti).await? {
            info!(jti = %jti, "Refresh token revoked");
        }
        Ok(())
    }

    /// Revoke every active token of a user. Returns how many were revoked.
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, AuthError> {
        let revoked = self.tokens.revoke_all_for_user(user_id).await?;
        if revoked > 0 {
            warn!(user_id, revoked, "All refresh tokens revoked");
        }
        Ok(revoked)
    }

    pub async fn get(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        Ok(self.tokens.get_by_jti(jti).await?)
    }

    /// Not revoked and not expired at the store's current time.
    pub fn is_active(&self, record: &RefreshTokenRecord) -> bool {
        record.is_active(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{Database, NewUser};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    struct Fixture {
        store: RefreshTokenStore,
        codec: Arc<TokenCodec>,
        clock: Arc<ManualClock>,
        user: User,
    }

    async fn fixture() -> Fixture {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create(
                &NewUser {
                    email: "rot@example.com",
                    password_hash: "x",
                    first_name: "",
                    last_name: "",
                },
                0,
            )
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let codec = Arc::new(TokenCodec::new(SECRET, "test", clock.clone()));
        let store = RefreshTokenStore::new(
            db.tokens(),
            codec.clone(),
            Duration::from_secs(3600),
            clock.clone(),
        );
        Fixture {
            store,
            codec,
            clock,
            user,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip_address: Some("192.0.2.7".into()),
            user_agent: Some("unit-test".into()),
        }
    }

    #[tokio::test]
    async fn test_create_persists_active_record() {
        let f = fixture().await;
        let issued = f.store.create(&f.user, &client()).await.unwrap();

        let record = f.store.get(&issued.jti).await.unwrap().unwrap();
        assert!(f.store.is_active(&record));
        assert_eq!(record.expires_at, issued.expires_at);
        assert_eq!(record.ip_address.as_deref(), Some("192.0.2.7"));

        let claims = f.codec.decode_refresh(&issued.token).unwrap();
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.body.user_id, f.user.uuid);
    }

    #[tokio::test]
    async fn test_rotate_once() {
        let f = fixture().await;
        let first = f.store.create(&f.user, &client()).await.unwrap();
        let second = f.store.rotate(&first.jti, &f.user).await.unwrap();

        let old = f.store.get(&first.jti).await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.replaced_by.as_deref(), Some(second.jti.as_str()));

        let new = f.store.get(&second.jti).await.unwrap().unwrap();
        assert!(f.store.is_active(&new));
        assert_eq!(new.user_agent.as_deref(), Some("unit-test"));
    }

    #[tokio::test]
    async fn test_replay_revokes_everything() {
        let f = fixture().await;
        let first = f.store.create(&f.user, &client()).await.unwrap();
        let other_device = f.store.create(&f.user, &ClientInfo::default()).await.unwrap();
        let second = f.store.rotate(&first.jti, &f.user).await.unwrap();

        let err = f.store.rotate(&first.jti, &f.user).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenReuseDetected));

        for jti in [&first.jti, &second.jti, &other_device.jti] {
            let record = f.store.get(jti).await.unwrap().unwrap();
            assert!(record.revoked, "{} should be revoked", jti);
        }
    }

    #[tokio::test]
    async fn test_unknown_jti_is_reuse() {
        let f = fixture().await;
        let live = f.store.create(&f.user, &client()).await.unwrap();

        let err = f.store.rotate("forged-jti", &f.user).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenReuseDetected));
        assert!(f.store.get(&live.jti).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn test_expired_record_is_reuse() {
        let f = fixture().await;
        let issued = f.store.create(&f.user, &client()).await.unwrap();
        f.clock.advance(Duration::from_secs(3600));

        let err = f.store.rotate(&issued.jti, &f.user).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenReuseDetected));
    }

    #[tokio::test]
    async fn test_revoke_idempotent() {
        let f = fixture().await;
        let issued = f.store.create(&f.user, &client()).await.unwrap();

        f.store.revoke(&issued.jti).await.unwrap();
        f.store.revoke(&issued.jti).await.unwrap();
        f.store.revoke("absent").await.unwrap();

        let record = f.store.get(&issued.jti).await.unwrap().unwrap();
        assert!(!f.store.is_active(&record));
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let f = fixture().await;
        f.store.create(&f.user, &client()).await.unwrap();
        f.store.create(&f.user, &client()).await.unwrap();

        assert_eq!(f.store.revoke_all(f.user.id).await.unwrap(), 2);
        assert_eq!(f.store.revoke_all(f.user.id).await.unwrap(), 0);
        let records = f.store.tokens.list_by_user(f.user.id).await.unwrap();
        assert!(records.iter().all(|r| !f.store.is_active(r)));
    }
}
