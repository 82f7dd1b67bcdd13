//! Per-IP request throttling for the public authentication endpoints.
//!
//! Uses a token bucket per client IP to slow down credential stuffing and
//! signup/code-request spam before any database or email work happens.

use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::Problem;
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct IpRateLimits {
    /// Login: bursts of 5, refilling one per second per IP
    pub login: Arc<IpLimiter>,
    /// Signup: 3 requests per minute per IP
    pub signup: Arc<IpLimiter>,
    /// Code requests (verification, password reset): 10 per minute per IP
    pub otp: Arc<IpLimiter>,
    /// Read the client IP from `X-Forwarded-For` instead of the socket.
    pub trust_forwarded_for: bool,
}

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const SIGNUP_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();
const OTP_PER_MIN: NonZeroU32 = NonZeroU32::new(10).unwrap();

impl IpRateLimits {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self::with_quotas(
            Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            Quota::per_minute(SIGNUP_PER_MIN),
            Quota::per_minute(OTP_PER_MIN),
            trust_forwarded_for,
        )
    }

    pub fn with_quotas(login: Quota, signup: Quota, otp: Quota, trust_forwarded_for: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(login)),
            signup: Arc::new(RateLimiter::keyed(signup)),
            otp: Arc::new(RateLimiter::keyed(otp)),
            trust_forwarded_for,
        }
    }

    /// Limits high enough that tests never trip them.
    pub fn relaxed(trust_forwarded_for: bool) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(1000).unwrap_or(NonZeroU32::MIN));
        Self::with_quotas(quota, quota, quota, trust_forwarded_for)
    }

    /// Forget buckets that have fully refilled.
    pub fn purge_stale(&self) {
        for limiter in [&self.login, &self.signup, &self.otp] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    fn check(&self, limiter: &IpLimiter, request: &Request, message: &'static str) -> Result<(), Response> {
        let ip = match extract_client_ip(request, self.trust_forwarded_for) {
            Ok(ip) => ip,
            Err(e) => {
                warn!(error = e, "Unable to determine client IP");
                return Err(Problem::forbidden("Unable to determine client IP.")
                    .at(request_path(request))
                    .into_response());
            }
        };

        limiter.check_key(&ip).map_err(|_| {
            warn!(ip = %ip, "Per-IP rate limit exceeded");
            Problem::too_many_requests(message)
                .at(request_path(request))
                .into_response()
        })
    }
}

/// Full request path, including any prefix stripped by `nest`.
pub(crate) fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(limits): State<Arc<IpRateLimits>>,
    request: Request,
    next: Next,
) -> Response {
    match limits.check(
        &limits.login,
        &request,
        "Too many login attempts. Please wait before trying again.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting signup.
pub async fn rate_limit_signup(
    State(limits): State<Arc<IpRateLimits>>,
    request: Request,
    next: Next,
) -> Response {
    match limits.check(
        &limits.signup,
        &request,
        "Too many signup attempts. Please wait before trying again.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting one-time code requests.
pub async fn rate_limit_otp(
    State(limits): State<Arc<IpRateLimits>>,
    request: Request,
    next: Next,
) -> Response {
    match limits.check(
        &limits.otp,
        &request,
        "Too many requests. Please try again later.",
    ) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
