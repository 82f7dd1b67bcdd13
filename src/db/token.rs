//! Refresh token allowlist.
//!
//! Only refresh tokens are stored; access tokens are stateless and short-lived.
//! Rows are never deleted. Revocation and rotation only flip `revoked` and
//! record the successor in `replaced_by`.

use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub jti: String,
    pub user_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub replaced_by: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RefreshTokenRecord {
    /// Not revoked and not yet expired.
    pub fn is_active(&self, now: i64) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken<'a> {
    pub jti: &'a str,
    pub user_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

/// Store for the refresh token allowlist.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new, active refresh token record.
    pub async fn insert(&self, token: &NewRefreshToken<'_>) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        Self::insert_in(&mut tx, token).await?;
        tx.commit().await
    }

    async fn insert_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        token: &NewRefreshToken<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, created_at, expires_at, revoked, ip_address, user_agent) VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(token.jti)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.ip_address)
        .bind(token.user_agent)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Get a record by its JWT ID.
    pub async fn get_by_jti(&self, jti: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT jti, user_id, created_at, expires_at, revoked, replaced_by, ip_address, user_agent FROM refresh_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
    }

    /// Get a record by JWT ID, only if it belongs to the given user.
    pub async fn get_for_user(
        &self,
        jti: &str,
        user_id: i64,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT jti, user_id, created_at, expires_at, revoked, replaced_by, ip_address, user_agent FROM refresh_tokens WHERE jti = ? AND user_id = ?",
        )
        .bind(jti)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Atomically retire an active record and insert its successor.
    ///
    /// The old record is claimed with a conditional update, so of two
    /// concurrent callers presenting the same jti only one gets `true`.
    /// Returns `false` (and writes nothing) when the old record is absent,
    /// revoked, expired or owned by another user. The successor inherits the
    /// client metadata of the record it replaces.
    pub async fn replace(
        &self,
        old_jti: &str,
        user_id: i64,
        now: i64,
        new_jti: &str,
        new_expires_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "UPDATE refresh_tokens SET revoked = 1, replaced_by = ?
             WHERE jti = ? AND user_id = ? AND revoked = 0 AND expires_at > ?
             RETURNING ip_address, user_agent",
        )
        .bind(new_jti)
        .bind(old_jti)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((ip_address, user_agent)) = claimed else {
            tx.rollback().await?;
            return Ok(false);
        };

        Self::insert_in(
            &mut tx,
            &NewRefreshToken {
                jti: new_jti,
                user_id,
                created_at: now,
                expires_at: new_expires_at,
                ip_address: ip_address.as_deref(),
                user_agent: user_agent.as_deref(),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Mark a record revoked. Absent or already revoked records are not an error.
    pub async fn revoke(&self, jti: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE jti = ? AND revoked = 0")
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every non-revoked record of a user (logout everywhere).
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let revoked = Self::revoke_all_in(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(revoked)
    }

    pub async fn revoke_all_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ? AND revoked = 0")
                .bind(user_id)
                .execute(&mut **tx)
                .await?;
        Ok(result.rows_affected())
    }

    /// List all records for a user, newest first.
    #[cfg(test)]
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT jti, user_id, created_at, expires_at, revoked, replaced_by, ip_address, user_agent FROM refresh_tokens WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
