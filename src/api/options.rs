//! Public choice lists for signup and organization forms.
//!
//! - GET `/auth/countries` - ISO 3166-1 countries
//! - GET `/signup-options` - Countries, sectors and reporting focuses
//! - GET `/organizations/options` - Sectors and reporting focuses

use axum::{Router, routing::get};
use serde::Serialize;

use super::extract::Json;
use crate::options::{self, Choice, Country, REPORTING_FOCUSES, SECTORS};

/// Routes mounted next to `/auth`.
pub fn router() -> Router {
    Router::new()
        .route("/signup-options", get(signup_options))
        .route("/organizations/options", get(organization_options))
}

/// Routes mounted inside `/auth`.
pub fn auth_router() -> Router {
    Router::new().route("/countries", get(countries))
}

#[derive(Serialize)]
struct CountriesResponse {
    countries: Vec<Country>,
}

async fn countries() -> Json<CountriesResponse> {
    Json(CountriesResponse {
        countries: options::countries().collect(),
    })
}

#[derive(Serialize)]
struct SignupOptionsResponse {
    countries: Vec<Country>,
    sectors: &'static [Choice],
    primary_reporting_focus: &'static [Choice],
}

async fn signup_options() -> Json<SignupOptionsResponse> {
    Json(SignupOptionsResponse {
        countries: options::countries().collect(),
        sectors: &SECTORS,
        primary_reporting_focus: &REPORTING_FOCUSES,
    })
}

#[derive(Serialize)]
struct OrganizationOptionsResponse {
    sectors: &'static [Choice],
    primary_reporting_focus: &'static [Choice],
}

async fn organization_options() -> Json<OrganizationOptionsResponse> {
    Json(OrganizationOptionsResponse {
        sectors: &SECTORS,
        primary_reporting_focus: &REPORTING_FOCUSES,
    })
}
