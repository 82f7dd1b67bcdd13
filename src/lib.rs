pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jwt;
pub mod mail;
pub mod options;
pub mod otp;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod signup;
pub mod tokens;

use api::create_api_router;
use auth::AppState;
use axum::Router;
use clock::{Clock, SystemClock};
use config::AuthSettings;
use db::Database;
use jwt::TokenCodec;
use mail::{EmailTransport, LogTransport, Mailer};
use otp::OtpService;
use rate_limit::{CounterStore, IpRateLimits, MemoryCounters, RateLimiter};
use session::AuthSessionManager;
use signup::SignupService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokens::RefreshTokenStore;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Lifetimes, code policy, cookie attributes and backend timeouts
    pub settings: AuthSettings,
    /// Backend for the hourly code request counters
    pub counters: Arc<dyn CounterStore>,
    /// Where outgoing email goes
    pub mail_transport: Arc<dyn EmailTransport>,
    /// Capacity of the background delivery queue. `None` sends every email inline.
    pub mail_queue: Option<usize>,
    pub clock: Arc<dyn Clock>,
    /// Per-IP throttling of the public auth endpoints
    pub ip_limits: Arc<IpRateLimits>,
}

impl ServerConfig {
    /// Default settings with in-process counters, a logging mail transport and
    /// the system clock.
    pub fn new(db: Database, jwt_secret: Vec<u8>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            db,
            jwt_secret,
            settings: AuthSettings::default(),
            counters: Arc::new(MemoryCounters::new(clock.clone())),
            mail_transport: Arc::new(LogTransport),
            mail_queue: Some(mail::DEFAULT_QUEUE_CAPACITY),
            clock,
            ip_limits: Arc::new(IpRateLimits::new(false)),
        }
    }
}

/// Wire the services together. Must be called inside a Tokio runtime when a
/// mail queue is configured.
pub fn build_state(config: &ServerConfig) -> AppState {
    let settings = Arc::new(config.settings.clone());
    let db = config.db.clone();
    let clock = config.clock.clone();

    let codec = Arc::new(TokenCodec::new(
        &config.jwt_secret,
        settings.issuer.clone(),
        clock.clone(),
    ));
    let refresh_tokens = RefreshTokenStore::new(
        db.tokens(),
        codec.clone(),
        settings.refresh_lifetime,
        clock.clone(),
    );

    let limiter = RateLimiter::new(config.counters.clone(), settings.timeouts.counters);
    let mailer = match config.mail_queue {
        Some(capacity) => Mailer::spawn(
            config.mail_transport.clone(),
            capacity,
            settings.timeouts.email,
        ),
        None => Mailer::direct(config.mail_transport.clone(), settings.timeouts.email),
    };

    let otp = OtpService::new(
        db.clone(),
        limiter,
        mailer,
        settings.otp.clone(),
        clock.clone(),
    );
    let sessions =
        AuthSessionManager::new(db.clone(), codec.clone(), refresh_tokens, settings.clone());
    let signup = SignupService::new(db.clone(), otp.clone(), clock);

    AppState {
        db,
        codec,
        settings,
        sessions,
        otp,
        signup,
        trust_forwarded_for: config.ip_limits.trust_forwarded_for,
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let state = build_state(config);
    Router::new().nest("/api", create_api_router(state, config.ip_limits.clone()))
}

/// Spawn the background cleanup scheduler.
/// Call this before starting the server.
pub fn init_cleanup(config: &ServerConfig) -> tokio::task::JoinHandle<()> {
    cleanup::spawn_cleanup_scheduler(config.counters.clone(), config.ip_limits.clone())
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
