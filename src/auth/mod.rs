//! Cookie-based JWT authentication for API routes.
//!
//! Short-lived access tokens are validated statelessly from the access cookie.
//! Long-lived refresh tokens live in their own cookie and are only read by the
//! refresh and logout endpoints. State-changing requests carry a double-submit
//! CSRF token.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use cookie::{
    access_cookie, append_cookies, build_cookie, clear_auth_cookies, clear_cookie, csrf_cookie,
    get_cookie, new_csrf_token, refresh_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{Auth, CSRF_HEADER, Client};
pub use ip::{HasHeadersAndExtensions, client_info, extract_client_ip, user_agent};
pub use state::{AppState, HasAuthBackend};
pub use types::AuthenticatedUser;
