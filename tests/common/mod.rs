#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use esg_accounts::{
    ServerConfig,
    clock::ManualClock,
    config::{AuthSettings, CookieSettings},
    create_app,
    db::Database,
    mail::testing::RecordingTransport,
    rate_limit::{IpRateLimits, MemoryCounters},
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"integration-test-secret-with-32-chars!";
pub const CLIENT_IP: &str = "203.0.113.10";
pub const START: i64 = 1_700_000_000;
pub const PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub mail: Arc<RecordingTransport>,
}

pub async fn test_app() -> TestApp {
    test_app_with(AuthSettings::default(), IpRateLimits::relaxed(true)).await
}

pub async fn test_app_with(settings: AuthSettings, limits: IpRateLimits) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let clock = Arc::new(ManualClock::new(START));
    let mail = Arc::new(RecordingTransport::default());
    let config = ServerConfig {
        db: db.clone(),
        jwt_secret: JWT_SECRET.to_vec(),
        settings: AuthSettings {
            cookies: CookieSettings {
                secure: false,
                ..settings.cookies.clone()
            },
            ..settings
        },
        counters: Arc::new(MemoryCounters::new(clock.clone())),
        mail_transport: mail.clone(),
        mail_queue: None,
        clock: clock.clone(),
        ip_limits: Arc::new(limits),
    };
    TestApp {
        app: create_app(&config),
        db,
        clock,
        mail,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }

    /// The most recent code mailed to `email`.
    pub fn latest_code(&self, email: &str) -> String {
        let message = self.mail.last_to(email).expect("No email sent");
        message
            .body
            .split(|c: char| !c.is_ascii_digit())
            .find(|word| word.len() == 6)
            .expect("No code in email")
            .to_string()
    }

    /// Sign up and verify the email of a new account.
    pub async fn verified_account(&self, email: &str, organization: &str) {
        let response = self
            .send(post_json("/api/auth/signup", &signup_body(email, organization), &[]))
            .await;
        assert_eq!(response.status(), 201, "signup failed");

        let code = self.latest_code(email);
        let response = self
            .send(post_json(
                "/api/auth/verify-otp",
                &json!({ "email": email, "code": code }),
                &[],
            ))
            .await;
        assert_eq!(response.status(), 200, "verification failed");
    }

    /// Log in and return the cookies that were set.
    pub async fn login(&self, email: &str, password: &str) -> Cookies {
        let response = self
            .send(post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": password }),
                &[],
            ))
            .await;
        assert_eq!(response.status(), 200, "login failed");
        Cookies::from_response(&response)
    }
}

pub fn signup_body(email: &str, organization: &str) -> Value {
    json!({
        "email": email,
        "password": PASSWORD,
        "first_name": "Ngozi",
        "last_name": "Eze",
        "organization_name": organization,
        "sector": "oil_gas",
        "country": "NG",
        "primary_reporting_focus": "HYBRID",
    })
}

/// A JSON POST from `CLIENT_IP` carrying `cookies`.
pub fn post_json(uri: &str, body: &Value, cookies: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Forwarded-For", CLIENT_IP);
    if !cookies.is_empty() {
        builder = builder.header(header::COOKIE, cookie_header(cookies));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

/// A bodyless request from `CLIENT_IP` carrying `cookies` and extra headers.
pub fn request(
    method: &str,
    uri: &str,
    cookies: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Forwarded-For", CLIENT_IP);
    if !cookies.is_empty() {
        builder = builder.header(header::COOKIE, cookie_header(cookies));
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

fn cookie_header(cookies: &[(&str, &str)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

/// The `Set-Cookie` headers of a response.
#[derive(Debug, Default, Clone)]
pub struct Cookies {
    pub raw: Vec<String>,
}

impl Cookies {
    pub fn from_response(response: &Response<Body>) -> Self {
        let raw = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        Self { raw }
    }

    pub fn raw_for(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}=", name);
        self.raw
            .iter()
            .find(|c| c.starts_with(&prefix))
            .map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let raw = self.raw_for(name)?;
        let value = &raw[name.len() + 1..];
        value.split(';').next()
    }

    /// Whether `name` is set to an empty value with `Max-Age=0`.
    pub fn cleared(&self, name: &str) -> bool {
        self.raw_for(name)
            .is_some_and(|c| c.starts_with(&format!("{}=;", name)) && c.contains("Max-Age=0"))
    }
}
