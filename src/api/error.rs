//! Problem-document error responses for API endpoints.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::error::AuthError;
use crate::jwt::TokenError;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// An RFC 7807 problem document.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: &'static str,
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Per-field messages for validation problems.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

impl Problem {
    fn new(status: StatusCode, slug: &str, title: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind: format!("/problems/{}", slug),
            title,
            status,
            detail: detail.into(),
            instance: None,
            errors: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad-request", "Bad request", detail)
    }

    /// A malformed request body. `errors` maps field names to messages.
    pub fn validation(detail: impl Into<String>, errors: BTreeMap<String, Vec<String>>) -> Self {
        let mut problem = Self::new(
            StatusCode::BAD_REQUEST,
            "validation-error",
            "Validation error",
            detail,
        );
        problem.errors = Some(errors);
        problem
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized", detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "Forbidden", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", "Not found", detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", "Conflict", detail)
    }

    pub fn too_many_requests(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "too-many-requests",
            "Too many requests",
            detail,
        )
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal-server-error",
            "Internal server error",
            "An unexpected error occurred",
        )
    }

    /// Set the request path the problem occurred on.
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.instance = Some(path.into());
        self
    }
}

impl From<AuthError> for Problem {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized(msg) => Problem::unauthorized(msg),
            AuthError::TokenReuseDetected => Problem::new(
                StatusCode::UNAUTHORIZED,
                "token-reuse-detected",
                "Unauthorized",
                "Refresh token reuse detected. All sessions have been signed out.",
            ),
            AuthError::Token(TokenError::Expired) => Problem::new(
                StatusCode::UNAUTHORIZED,
                "token-expired",
                "Unauthorized",
                "Token has expired",
            ),
            AuthError::Token(TokenError::Encoding(e)) => {
                error!(error = %e, "Token signing failed");
                Problem::internal()
            }
            AuthError::Token(TokenError::Claims) => {
                error!("Token claims could not be encoded");
                Problem::internal()
            }
            AuthError::Token(TokenError::Invalid | TokenError::Malformed) => Problem::new(
                StatusCode::UNAUTHORIZED,
                "invalid-token",
                "Unauthorized",
                "Invalid token",
            ),
            AuthError::RateLimited(msg) => Problem::too_many_requests(msg),
            AuthError::NotFound(msg) => Problem::not_found(msg),
            AuthError::Expired => Problem::new(
                StatusCode::BAD_REQUEST,
                "code-expired",
                "Bad request",
                "The code has expired. Request a new one.",
            ),
            AuthError::InvalidCode => Problem::new(
                StatusCode::BAD_REQUEST,
                "invalid-code",
                "Bad request",
                "The code is incorrect",
            ),
            AuthError::Conflict(msg) => Problem::conflict(msg),
            AuthError::BadRequest(msg) => Problem::bad_request(msg),
            AuthError::Database(e) => {
                error!(error = %e, "Database error");
                Problem::internal()
            }
            AuthError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                Problem::internal()
            }
        }
    }
}

impl From<sqlx::Error> for Problem {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err).into()
    }
}

impl From<JsonRejection> for Problem {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => Problem::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported-media-type",
                "Unsupported media type",
                "Expected a request body with `Content-Type: application/json`",
            ),
            JsonRejection::JsonDataError(e) => {
                let text = e.body_text();
                let (field, message) = field_error(&text);
                Problem::validation(
                    "The request body is invalid",
                    BTreeMap::from([(field, vec![message])]),
                )
            }
            JsonRejection::JsonSyntaxError(_) => Problem::validation(
                "The request body is not valid JSON",
                BTreeMap::from([(
                    NON_FIELD_ERRORS.to_string(),
                    vec!["Malformed JSON".to_string()],
                )]),
            ),
            other => Problem::bad_request(other.body_text()),
        }
    }
}

const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Split a deserialization message into the offending field and a message.
///
/// Messages look like "...target type: missing field `email` at line 1 column 2"
/// or "...target type: email: invalid type: integer `1`, expected a string at ...".
fn field_error(text: &str) -> (String, String) {
    let reason = text
        .split_once("target type: ")
        .map_or(text, |(_, reason)| reason);
    let reason = reason
        .rsplit_once(" at line ")
        .map_or(reason, |(reason, _)| reason);

    if let Some(rest) = reason.strip_prefix("missing field `") {
        if let Some((field, _)) = rest.split_once('`') {
            return (field.to_string(), "This field is required.".to_string());
        }
    }
    if let Some((path, message)) = reason.split_once(": ") {
        let is_field = !path.is_empty()
            && path
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if is_field && path != "." {
            return (path.to_string(), message.to_string());
        }
    }
    (NON_FIELD_ERRORS.to_string(), reason.to_string())
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(&self)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_CONTENT_TYPE),
        );
        response
    }
}
