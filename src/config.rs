//! Immutable settings resolved once at startup.
//!
//! Every component receives the parts it needs at construction time;
//! nothing reads configuration from global state.

use std::time::Duration;

/// Default issuer written into every token.
pub const DEFAULT_ISSUER: &str = "esg-accounts";

/// Access token lifetime: 5 minutes
pub const DEFAULT_ACCESS_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// `iss` claim for issued tokens; decoded tokens must carry the same value.
    pub issuer: String,
    pub access_lifetime: Duration,
    pub refresh_lifetime: Duration,
    pub otp: OtpSettings,
    pub cookies: CookieSettings,
    pub timeouts: BackendTimeouts,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            access_lifetime: DEFAULT_ACCESS_LIFETIME,
            refresh_lifetime: DEFAULT_REFRESH_LIFETIME,
            otp: OtpSettings::default(),
            cookies: CookieSettings::default(),
            timeouts: BackendTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OtpSettings {
    /// Number of decimal digits in a code.
    pub length: usize,
    pub ttl: Duration,
    pub max_requests_per_hour: u32,
    pub max_resends_per_hour: u32,
    /// Submissions checked per code before it is locked. 0 disables the cutoff.
    pub max_attempts: u32,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            length: 6,
            ttl: Duration::from_secs(60 * 60),
            max_requests_per_hour: 6,
            max_resends_per_hour: 5,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub access_name: String,
    pub refresh_name: String,
    pub csrf_name: String,
    /// Set the `Secure` attribute. Only disable for local HTTP development.
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            access_name: "access_token".to_string(),
            refresh_name: "refresh_token".to_string(),
            csrf_name: "csrftoken".to_string(),
            secure: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
        }
    }
}

/// Upper bounds on calls to external backends.
#[derive(Debug, Clone)]
pub struct BackendTimeouts {
    pub counters: Duration,
    pub email: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            counters: Duration::from_millis(250),
            email: Duration::from_secs(5),
        }
    }
}
