//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use crate::ServerConfig;
use crate::clock::Clock;
use crate::config::{AuthSettings, CookieSettings, DEFAULT_ISSUER, OtpSettings};
use crate::db::Database;
use crate::mail::{self, LogTransport};
use crate::rate_limit::{CounterStore, IpRateLimits, MemoryCounters, RedisCounters};

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "esg-accounts",
    about = "Account, session and one-time code service for ESG reporting"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "esg-accounts.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Issuer written into and required on every token
    #[arg(long, env = "JWT_ISSUER", default_value = DEFAULT_ISSUER)]
    pub issuer: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "JWT_ACCESS_LIFETIME_SECONDS", default_value = "300", value_parser = clap::value_parser!(u64).range(1..))]
    pub access_lifetime: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "JWT_REFRESH_LIFETIME_SECONDS", default_value = "604800", value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_lifetime: u64,

    /// Digits in a one-time code
    #[arg(long, env = "OTP_LENGTH", default_value = "6", value_parser = clap::value_parser!(u8).range(4..=10))]
    pub otp_length: u8,

    /// One-time code lifetime in seconds
    #[arg(long, env = "OTP_TTL_SECONDS", default_value = "3600", value_parser = clap::value_parser!(u64).range(60..))]
    pub otp_ttl: u64,

    /// Code requests allowed per email address and purpose per hour
    #[arg(long, env = "OTP_MAX_REQUESTS_PER_HOUR", default_value = "6")]
    pub otp_max_requests_per_hour: u32,

    /// Code resends allowed per email address and purpose per hour
    #[arg(long, env = "OTP_MAX_RESENDS_PER_HOUR", default_value = "5")]
    pub otp_max_resends_per_hour: u32,

    /// Submissions checked per code (0 disables the cutoff)
    #[arg(long, env = "OTP_MAX_ATTEMPTS", default_value = "5")]
    pub otp_max_attempts: u32,

    /// Redis URL for shared rate limit counters. In-process counters are used when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Omit the Secure cookie attribute (local HTTP development only)
    #[arg(long)]
    pub insecure_cookies: bool,

    /// Take the client IP from X-Forwarded-For (requires running behind a proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    /// Settings resolved from the arguments.
    pub fn settings(&self) -> AuthSettings {
        AuthSettings {
            issuer: self.issuer.clone(),
            access_lifetime: Duration::from_secs(self.access_lifetime),
            refresh_lifetime: Duration::from_secs(self.refresh_lifetime),
            otp: OtpSettings {
                length: usize::from(self.otp_length),
                ttl: Duration::from_secs(self.otp_ttl),
                max_requests_per_hour: self.otp_max_requests_per_hour,
                max_resends_per_hour: self.otp_max_resends_per_hour,
                max_attempts: self.otp_max_attempts,
            },
            cookies: CookieSettings {
                secure: !self.insecure_cookies,
                ..CookieSettings::default()
            },
            ..AuthSettings::default()
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Connect the rate limit counter backend.
/// Returns None and logs an error if Redis is configured but unreachable.
pub async fn connect_counters(
    redis_url: Option<&str>,
    clock: Arc<dyn Clock>,
) -> Option<Arc<dyn CounterStore>> {
    let Some(url) = redis_url else {
        info!("Using in-process rate limit counters");
        return Some(Arc::new(MemoryCounters::new(clock)));
    };

    match RedisCounters::connect(url).await {
        Ok(counters) => {
            info!("Connected to Redis for rate limit counters");
            Some(Arc::new(counters))
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to Redis");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    jwt_secret: String,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        settings: args.settings(),
        counters,
        mail_transport: Arc::new(LogTransport),
        mail_queue: Some(mail::DEFAULT_QUEUE_CAPACITY),
        clock,
        ip_limits: Arc::new(IpRateLimits::new(args.trust_forwarded_for)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSite;

    #[test]
    fn test_defaults_match_settings_defaults() {
        let args = Args::parse_from(["esg-accounts"]);
        let settings = args.settings();
        let defaults = AuthSettings::default();

        assert_eq!(settings.issuer, defaults.issuer);
        assert_eq!(settings.access_lifetime, defaults.access_lifetime);
        assert_eq!(settings.refresh_lifetime, defaults.refresh_lifetime);
        assert_eq!(settings.otp.length, defaults.otp.length);
        assert_eq!(settings.otp.ttl, defaults.otp.ttl);
        assert_eq!(settings.otp.max_requests_per_hour, defaults.otp.max_requests_per_hour);
        assert_eq!(settings.otp.max_resends_per_hour, defaults.otp.max_resends_per_hour);
        assert_eq!(settings.otp.max_attempts, defaults.otp.max_attempts);
        assert!(settings.cookies.secure);
        assert_eq!(settings.cookies.same_site, SameSite::Lax);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "esg-accounts",
            "--issuer",
            "staging",
            "--access-lifetime",
            "60",
            "--otp-length",
            "8",
            "--insecure-cookies",
        ]);
        let settings = args.settings();
        assert_eq!(settings.issuer, "staging");
        assert_eq!(settings.access_lifetime, Duration::from_secs(60));
        assert_eq!(settings.otp.length, 8);
        assert!(!settings.cookies.secure);
    }

    #[test]
    fn test_rejects_out_of_range_code_length() {
        assert!(Args::try_parse_from(["esg-accounts", "--otp-length", "3"]).is_err());
        assert!(Args::try_parse_from(["esg-accounts", "--access-lifetime", "0"]).is_err());
    }
}
