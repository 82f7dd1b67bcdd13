mod auth;
mod error;
mod extract;
mod options;

use axum::Router;
use std::sync::Arc;

use crate::auth::AppState;
use crate::rate_limit::IpRateLimits;

pub use error::Problem;
pub use extract::Json;

/// Create the API router.
pub fn create_api_router(state: AppState, limits: Arc<IpRateLimits>) -> Router {
    Router::new()
        .nest("/auth", auth::router(state, limits).merge(options::auth_router()))
        .merge(options::router())
}
