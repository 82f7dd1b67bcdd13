//! Authentication API endpoints.
//!
//! - POST `/signup` - Create an account and its organization
//! - POST `/login` - Check credentials, set access/refresh/CSRF cookies
//! - POST `/refresh` - Rotate the refresh token, set fresh cookies
//! - POST `/logout` - Revoke the refresh token and clear cookies
//! - GET `/csrf` - Set the CSRF cookie
//! - POST `/request-otp` - Send an email verification code
//! - POST `/verify-otp` - Activate the account with a code
//! - POST `/request-password-reset` - Send a password reset code
//! - POST `/reset-password` - Set a new password with a code
//! - GET `/me` - Claims of the current access token

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::Problem;
use super::extract::Json;
use crate::auth::{
    AppState, Auth, Client, access_cookie, append_cookies, clear_auth_cookies, csrf_cookie,
    get_cookie, new_csrf_token, refresh_cookie,
};
use crate::db::{MembershipDetail, OtpPurpose, User};
use crate::error::AuthError;
use crate::rate_limit::{IpRateLimits, rate_limit_login, rate_limit_otp, rate_limit_signup};
use crate::signup::{SignupRequest, SignupSummary};

pub fn router(state: AppState, limits: Arc<IpRateLimits>) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits.clone(), rate_limit_login));

    let signup_router = Router::new()
        .route("/signup", post(signup))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits.clone(), rate_limit_signup));

    let otp_router = Router::new()
        .route("/request-otp", post(request_otp))
        .route("/verify-otp", post(verify_otp))
        .route("/request-password-reset", post(request_password_reset))
        .route("/reset-password", post(reset_password))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(limits, rate_limit_otp));

    let session_router = Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/csrf", get(csrf))
        .route("/me", get(me))
        .with_state(state);

    Router::new()
        .merge(login_router)
        .merge(signup_router)
        .merge(otp_router)
        .merge(session_router)
}

#[derive(Deserialize)]
struct SignupBody {
    email: String,
    password: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    organization_name: String,
    sector: String,
    country: String,
    primary_reporting_focus: String,
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<(StatusCode, Json<SignupSummary>), Problem> {
    let summary = state
        .signup
        .signup(&SignupRequest {
            email: &body.email,
            password: &body.password,
            first_name: &body.first_name,
            last_name: &body.last_name,
            organization_name: &body.organization_name,
            sector: &body.sector,
            country: &body.country,
            primary_reporting_focus: &body.primary_reporting_focus,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct UserInfo {
    id: String,
    email: String,
    first_name: String,
    last_name: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.uuid.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        }
    }
}

#[derive(Serialize)]
struct LoginResponse {
    user: UserInfo,
    memberships: Vec<MembershipDetail>,
}

async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    Json(body): Json<LoginBody>,
) -> Result<Response, Problem> {
    let outcome = state
        .sessions
        .login(body.email.trim(), &body.password, &client)
        .await?;

    let cookies = &state.settings.cookies;
    let mut response = Json(LoginResponse {
        user: UserInfo::from(&outcome.user),
        memberships: outcome.memberships,
    })
    .into_response();
    append_cookies(
        response.headers_mut(),
        [
            access_cookie(cookies, &outcome.access),
            refresh_cookie(cookies, &outcome.refresh),
            csrf_cookie(cookies, &new_csrf_token()),
        ],
    );
    Ok(response)
}

/// Rotate the refresh token from the cookie.
///
/// Failures that end the session (bad, expired or replayed tokens) also clear
/// the auth cookies.
async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookies = &state.settings.cookies;
    let Some(token) = get_cookie(&headers, &cookies.refresh_name).filter(|t| !t.is_empty()) else {
        return Problem::unauthorized("Missing refresh token").into_response();
    };

    match state.sessions.refresh(token).await {
        Ok(pair) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            append_cookies(
                response.headers_mut(),
                [
                    access_cookie(cookies, &pair.access),
                    refresh_cookie(cookies, &pair.refresh),
                ],
            );
            response
        }
        Err(e) => {
            let clear = e.invalidates_session();
            let mut response = Problem::from(e).into_response();
            if clear {
                append_cookies(response.headers_mut(), clear_auth_cookies(cookies));
            }
            response
        }
    }
}

/// Always succeeds and always clears the auth cookies.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookies = &state.settings.cookies;
    let token = get_cookie(&headers, &cookies.refresh_name).filter(|t| !t.is_empty());
    state.sessions.logout(token).await;

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookies(response.headers_mut(), clear_auth_cookies(cookies));
    response
}

/// Set the CSRF cookie, keeping an existing token.
async fn csrf(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookies = &state.settings.cookies;
    let token = get_cookie(&headers, &cookies.csrf_name)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_csrf_token);

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookies(response.headers_mut(), [csrf_cookie(cookies, &token)]);
    response
}

#[derive(Deserialize)]
struct CodeRequestBody {
    email: String,
    #[serde(default)]
    resend: bool,
}

#[derive(Serialize)]
struct CodeSentResponse {
    otp_sent: bool,
}

async fn request_otp(
    State(state): State<AppState>,
    Json(body): Json<CodeRequestBody>,
) -> Result<Json<CodeSentResponse>, Problem> {
    let user = state
        .db
        .users()
        .get_by_email(body.email.trim())
        .await?
        .ok_or_else(|| Problem::not_found("User not found"))?;
    if user.is_active {
        return Err(Problem::conflict("Account is already verified"));
    }

    let (_, otp_sent) = state
        .otp
        .request_otp(&user, OtpPurpose::VerifyEmail, body.resend)
        .await?;
    Ok(Json(CodeSentResponse { otp_sent }))
}

#[derive(Deserialize)]
struct VerifyBody {
    email: String,
    code: String,
}

#[derive(Serialize)]
struct VerifiedResponse {
    verified: bool,
}

async fn verify_otp(
    State(state): State<AppState>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<VerifiedResponse>, Problem> {
    let user = state
        .db
        .users()
        .get_by_email(body.email.trim())
        .await?
        .ok_or_else(|| Problem::not_found("User not found"))?;
    if user.is_active {
        return Err(Problem::conflict("Account is already verified"));
    }

    state.otp.verify_email(&user, &body.code).await?;
    Ok(Json(VerifiedResponse { verified: true }))
}

#[derive(Serialize)]
struct DetailResponse {
    detail: &'static str,
}

const RESET_REQUESTED: &str = "If an account exists for this email, a reset code has been sent";

/// Answers the same way whether or not the account exists.
async fn request_password_reset(
    State(state): State<AppState>,
    Json(body): Json<CodeRequestBody>,
) -> Result<Json<DetailResponse>, Problem> {
    let response = Json(DetailResponse {
        detail: RESET_REQUESTED,
    });

    let Some(user) = state.db.users().get_by_email(body.email.trim()).await? else {
        info!("Password reset requested for unknown email");
        return Ok(response);
    };

    match state
        .otp
        .request_otp(&user, OtpPurpose::ResetPassword, body.resend)
        .await
    {
        Ok(_) => {}
        Err(AuthError::RateLimited(msg)) => {
            warn!(user_id = %user.uuid, reason = %msg, "Password reset code not issued");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(response)
}

#[derive(Deserialize)]
struct ResetPasswordBody {
    email: String,
    code: String,
    new_password: String,
}

async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordBody>,
) -> Result<Json<DetailResponse>, Problem> {
    let user = state
        .db
        .users()
        .get_by_email(body.email.trim())
        .await?
        .ok_or_else(|| Problem::not_found("No code has been requested"))?;

    state
        .otp
        .reset_password(&user, &body.code, &body.new_password)
        .await?;
    Ok(Json(DetailResponse {
        detail: "Password has been reset",
    }))
}

#[derive(Serialize)]
struct MeResponse {
    user_id: String,
    organization_id: Option<String>,
    roles: Vec<String>,
    expires_at: i64,
}

async fn me(Auth(user): Auth) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id().to_string(),
        organization_id: user.organization_id().map(str::to_string),
        roles: user.claims.body.roles.clone(),
        expires_at: user.claims.exp,
    })
}
