//! One-time codes for email verification and password reset.
//!
//! Codes are numeric, drawn from the thread-local CSPRNG, and stored only as
//! Argon2 hashes. Issuing is gated by hourly counters per email address;
//! verifying is gated by a per-code attempt cutoff.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::OtpSettings;
use crate::db::{Database, OtpPurpose, OtpRecord, TokenStore, User, UserStore};
use crate::error::AuthError;
use crate::mail::{self, Mailer, OutgoingEmail};
use crate::password;
use crate::rate_limit::RateLimiter;

const WINDOW: Duration = Duration::from_secs(60 * 60);

/// What a verified code authorizes.
#[derive(Debug, Clone, Copy)]
pub enum OtpAction<'a> {
    /// Activate the account.
    VerifyEmail,
    /// Replace the password with `new_password`.
    ResetPassword { new_password: &'a str },
}

impl OtpAction<'_> {
    pub fn purpose(&self) -> OtpPurpose {
        match self {
            OtpAction::VerifyEmail => OtpPurpose::VerifyEmail,
            OtpAction::ResetPassword { .. } => OtpPurpose::ResetPassword,
        }
    }
}

#[derive(Clone)]
pub struct OtpService {
    db: Database,
    limiter: RateLimiter,
    mailer: Mailer,
    settings: OtpSettings,
    clock: Arc<dyn Clock>,
}

impl OtpService {
    pub fn new(
        db: Database,
        limiter: RateLimiter,
        mailer: Mailer,
        settings: OtpSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            limiter,
            mailer,
            settings,
            clock,
        }
    }

    /// Issue and send a new code.
    ///
    /// Returns the stored record and whether the email was handed off. A
    /// delivery failure does not fail the request; the caller may resend.
    pub async fn request_otp(
        &self,
        user: &User,
        purpose: OtpPurpose,
        is_resend: bool,
    ) -> Result<(OtpRecord, bool), AuthError> {
        let identifier = user.email.to_lowercase();

        let requests_ns = format!("otp_requests:{}", purpose);
        if !self
            .limiter
            .check_and_increment(&requests_ns, &identifier, self.settings.max_requests_per_hour, WINDOW)
            .await
        {
            warn!(user_id = %user.uuid, purpose = %purpose, "Code request limit reached");
            return Err(AuthError::rate_limited(
                "Code request limit reached for this hour",
            ));
        }

        if is_resend {
            let resends_ns = format!("otp_resends:{}", purpose);
            if !self
                .limiter
                .check_and_increment(&resends_ns, &identifier, self.settings.max_resends_per_hour, WINDOW)
                .await
            {
                warn!(user_id = %user.uuid, purpose = %purpose, "Code resend limit reached");
                return Err(AuthError::rate_limited("Code resend limit reached for this hour"));
            }
        }

        let code = generate_code(self.settings.length);
        let hashed = password::hash(&code)?;
        let now = self.clock.now();
        let record = self
            .db
            .otps(purpose)
            .insert(user.id, &hashed, now, now + self.settings.ttl.as_secs() as i64)
            .await?;

        let email = match purpose {
            OtpPurpose::VerifyEmail => OutgoingEmail {
                to: user.email.clone(),
                subject: mail::VERIFICATION_SUBJECT.to_string(),
                body: mail::verification_body(&code, self.settings.ttl),
            },
            OtpPurpose::ResetPassword => OutgoingEmail {
                to: user.email.clone(),
                subject: mail::PASSWORD_RESET_SUBJECT.to_string(),
                body: mail::password_reset_body(&code, self.settings.ttl),
            },
        };
        let enqueued = self.mailer.deliver(email).await;

        info!(user_id = %user.uuid, purpose = %purpose, enqueued, "One-time code issued");
        Ok((record, enqueued))
    }

    /// Check `code` against the user's latest record for the action's purpose
    /// and, on a match, carry out the action. Returns the user's id.
    pub async fn verify_otp(
        &self,
        user: &User,
        action: OtpAction<'_>,
        code: &str,
    ) -> Result<i64, AuthError> {
        let purpose = action.purpose();
        let store = self.db.otps(purpose);

        let Some(record) = store.latest_for_user(user.id).await? else {
            return Err(AuthError::not_found("No code has been requested"));
        };
        if record.is_consumed() {
            return Err(AuthError::not_found("Code has already been used"));
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            return Err(AuthError::Expired);
        }

        // Claimed before the hash check so parallel guesses share one budget.
        let Some(attempts) = store
            .claim_attempt(record.id, self.settings.max_attempts)
            .await?
        else {
            warn!(user_id = %user.uuid, purpose = %purpose, "Code locked after too many attempts");
            return Err(AuthError::rate_limited(
                "Too many incorrect attempts, request a new code",
            ));
        };

        if !password::verify(code.trim(), &record.hashed_otp) {
            info!(user_id = %user.uuid, purpose = %purpose, attempts, "Incorrect code submitted");
            return Err(AuthError::InvalidCode);
        }

        let new_hash = match action {
            OtpAction::VerifyEmail => None,
            OtpAction::ResetPassword { new_password } => Some(password::hash(new_password)?),
        };

        // Consuming the code and applying its effect commit together or not at all.
        let mut tx = self.db.begin().await?;
        if !store.mark_consumed(&mut tx, record.id, now).await? {
            tx.rollback().await?;
            return Err(AuthError::not_found("Code has already been used"));
        }
        match new_hash {
            None => {
                UserStore::activate_in(&mut tx, user.id).await?;
                tx.commit().await?;
                info!(user_id = %user.uuid, "Email verified, account activated");
            }
            Some(hash) => {
                UserStore::set_password_hash_in(&mut tx, user.id, &hash).await?;
                let revoked = TokenStore::revoke_all_in(&mut tx, user.id).await?;
                tx.commit().await?;
                info!(user_id = %user.uuid, revoked, "Password reset, refresh tokens revoked");
            }
        }

        Ok(user.id)
    }

    pub async fn verify_email(&self, user: &User, code: &str) -> Result<i64, AuthError> {
        self.verify_otp(user, OtpAction::VerifyEmail, code).await
    }

    /// Validate the new password first so a weak password does not burn the code.
    pub async fn reset_password(
        &self,
        user: &User,
        code: &str,
        new_password: &str,
    ) -> Result<i64, AuthError> {
        password::validate_strength(new_password).map_err(AuthError::BadRequest)?;
        self.verify_otp(user, OtpAction::ResetPassword { new_password }, code)
            .await
    }
}

/// A string of `length` uniformly random decimal digits.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}
