//! Shared handler state.

use std::sync::Arc;

use crate::config::{AuthSettings, CookieSettings};
use crate::db::Database;
use crate::jwt::TokenCodec;
use crate::otp::OtpService;
use crate::session::AuthSessionManager;
use crate::signup::SignupService;

/// Trait for state types that extractors can authenticate against.
pub trait HasAuthBackend {
    fn codec(&self) -> &TokenCodec;
    fn cookies(&self) -> &CookieSettings;
    fn trust_forwarded_for(&self) -> bool;
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub settings: Arc<AuthSettings>,
    pub sessions: AuthSessionManager,
    pub otp: OtpService,
    pub signup: SignupService,
    pub trust_forwarded_for: bool,
}

impl HasAuthBackend for AppState {
    fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    fn cookies(&self) -> &CookieSettings {
        &self.settings.cookies
    }

    fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}
