//! One-time code records for email verification and password reset.
//!
//! Both purposes share one shape but live in separate tables. Records are
//! never deleted; `attempts` only grows and `expires_at` never changes.
//! `attempts` counts every submission checked against the record.

use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    VerifyEmail,
    ResetPassword,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::VerifyEmail => "verify_email",
            OtpPurpose::ResetPassword => "reset_password",
        }
    }
}

impl std::fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OtpRecord {
    pub id: i64,
    pub user_id: i64,
    pub hashed_otp: String,
    pub created_at: i64,
    pub expires_at: i64,
    /// `verified_at` or `used_at`, depending on the purpose.
    pub consumed_at: Option<i64>,
    pub attempts: i64,
}

impl OtpRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

struct Queries {
    insert: &'static str,
    latest: &'static str,
    claim_attempt: &'static str,
    mark_consumed: &'static str,
}

const EMAIL_VERIFICATION_QUERIES: Queries = Queries {
    insert: "INSERT INTO email_verifications (user_id, hashed_otp, created_at, expires_at, attempts) VALUES (?, ?, ?, ?, 0)",
    latest: "SELECT id, user_id, hashed_otp, created_at, expires_at, verified_at AS consumed_at, attempts FROM email_verifications WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    claim_attempt: "UPDATE email_verifications SET attempts = attempts + 1 WHERE id = ? AND (? = 0 OR attempts < ?) RETURNING attempts",
    mark_consumed: "UPDATE email_verifications SET verified_at = ? WHERE id = ? AND verified_at IS NULL",
};

const PASSWORD_RESET_QUERIES: Queries = Queries {
    insert: "INSERT INTO password_resets (user_id, hashed_otp, created_at, expires_at, attempts) VALUES (?, ?, ?, ?, 0)",
    latest: "SELECT id, user_id, hashed_otp, created_at, expires_at, used_at AS consumed_at, attempts FROM password_resets WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    claim_attempt: "UPDATE password_resets SET attempts = attempts + 1 WHERE id = ? AND (? = 0 OR attempts < ?) RETURNING attempts",
    mark_consumed: "UPDATE password_resets SET used_at = ? WHERE id = ? AND used_at IS NULL",
};

/// Store for the one-time code records of a single purpose.
#[derive(Clone)]
pub struct OtpStore {
    pool: SqlitePool,
    purpose: OtpPurpose,
}

impl OtpStore {
    pub fn new(pool: SqlitePool, purpose: OtpPurpose) -> Self {
        Self { pool, purpose }
    }

    fn queries(&self) -> &'static Queries {
        match self.purpose {
            OtpPurpose::VerifyEmail => &EMAIL_VERIFICATION_QUERIES,
            OtpPurpose::ResetPassword => &PASSWORD_RESET_QUERIES,
        }
    }

    /// Persist a new record with zero attempts.
    pub async fn insert(
        &self,
        user_id: i64,
        hashed_otp: &str,
        created_at: i64,
        expires_at: i64,
    ) -> Result<OtpRecord, sqlx::Error> {
        let result = sqlx::query(self.queries().insert)
            .bind(user_id)
            .bind(hashed_otp)
            .bind(created_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(OtpRecord {
            id: result.last_insert_rowid(),
            user_id,
            hashed_otp: hashed_otp.to_string(),
            created_at,
            expires_at,
            consumed_at: None,
            attempts: 0,
        })
    }

    /// The most recently issued record for a user.
    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<OtpRecord>, sqlx::Error> {
        sqlx::query_as(self.queries().latest)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Take one of the record's attempt slots before a submission is checked.
    ///
    /// The check and the increment are one statement, so concurrent callers
    /// can never take more than `max_attempts` slots between them. Returns the
    /// new count, or `None` once the cutoff is reached. Zero means unlimited.
    pub async fn claim_attempt(&self, id: i64, max_attempts: u32) -> Result<Option<i64>, sqlx::Error> {
        let max_attempts = i64::from(max_attempts);
        let row: Option<(i64,)> = sqlx::query_as(self.queries().claim_attempt)
            .bind(id)
            .bind(max_attempts)
            .bind(max_attempts)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(attempts,)| attempts))
    }

    /// Mark a record verified/used inside an open transaction. Returns false
    /// if it was already consumed.
    pub async fn mark_consumed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(self.queries().mark_consumed)
            .bind(now)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
