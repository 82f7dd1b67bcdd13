//! Account signup: a new inactive user, the organization they administer, and
//! the first email verification code.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::db::{
    Database, FrameworkStore, NewOrganization, NewUser, OrganizationStore, OtpPurpose, RoleStore,
    UserStore,
};
use crate::error::AuthError;
use crate::options::{self, REPORTING_FOCUSES, SECTORS};
use crate::otp::OtpService;
use crate::password;

const OWNER_ROLE_CODE: &str = "org_admin";
const OWNER_ROLE_NAME: &str = "Organization Administrator";

const MAX_NAME_LENGTH: usize = 150;
const MAX_ORGANIZATION_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy)]
pub struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub organization_name: &'a str,
    pub sector: &'a str,
    pub country: &'a str,
    pub primary_reporting_focus: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupSummary {
    pub user_id: String,
    pub email: String,
    pub organization_id: String,
    pub organization_name: String,
    pub sector: String,
    pub primary_reporting_focus: String,
    /// Codes of the frameworks enabled for the organization, primary first.
    pub frameworks: Vec<String>,
    pub verification_required: bool,
    pub otp_sent: bool,
}

#[derive(Clone)]
pub struct SignupService {
    db: Database,
    otp: OtpService,
    clock: Arc<dyn Clock>,
}

impl SignupService {
    pub fn new(db: Database, otp: OtpService, clock: Arc<dyn Clock>) -> Self {
        Self { db, otp, clock }
    }

    pub async fn signup(&self, request: &SignupRequest<'_>) -> Result<SignupSummary, AuthError> {
        validate(request)?;

        let email = request.email.trim();
        let organization_name = request.organization_name.trim();
        let country = request.country.trim().to_ascii_uppercase();

        if self.db.users().email_exists(email).await? {
            warn!(email = %email, "Signup failed: email already registered");
            return Err(AuthError::conflict(format!("Email {} is already registered", email)));
        }
        if self.db.organizations().name_exists(organization_name).await? {
            warn!(organization_name = %organization_name, "Signup failed: organization name taken");
            return Err(AuthError::conflict(format!(
                "Organization name '{}' is already taken",
                organization_name
            )));
        }

        let password_hash = password::hash(request.password)?;
        let now = self.clock.now();

        let mut tx = self.db.begin().await?;
        let user = UserStore::insert(
            &mut tx,
            &NewUser {
                email,
                password_hash: &password_hash,
                first_name: request.first_name.trim(),
                last_name: request.last_name.trim(),
            },
            now,
        )
        .await
        .map_err(|e| conflict_on_unique(e, "Email is already registered"))?;
        let organization = OrganizationStore::insert(
            &mut tx,
            &NewOrganization {
                name: organization_name,
                sector: request.sector,
                country: &country,
                primary_reporting_focus: request.primary_reporting_focus,
            },
            now,
        )
        .await
        .map_err(|e| conflict_on_unique(e, "Organization name is already taken"))?;
        let role = RoleStore::get_or_create(&mut tx, OWNER_ROLE_CODE, OWNER_ROLE_NAME).await?;
        OrganizationStore::add_member(&mut tx, user.id, organization.id, role.id, now).await?;
        let frameworks = FrameworkStore::select_for(
            &mut tx,
            &organization.primary_reporting_focus,
            &organization.sector,
        )
        .await?;
        FrameworkStore::assign(&mut tx, organization.id, &frameworks, now).await?;
        tx.commit().await?;

        info!(
            user_id = %user.uuid,
            organization_id = %organization.uuid,
            sector = %organization.sector,
            frameworks = frameworks.len(),
            "Account and organization created"
        );

        let otp_sent = match self.otp.request_otp(&user, OtpPurpose::VerifyEmail, false).await {
            Ok((_, sent)) => sent,
            Err(e) => {
                error!(user_id = %user.uuid, error = %e, "Failed to issue verification code at signup");
                false
            }
        };

        Ok(SignupSummary {
            user_id: user.uuid,
            email: user.email,
            organization_id: organization.uuid,
            organization_name: organization.name,
            sector: organization.sector,
            primary_reporting_focus: organization.primary_reporting_focus,
            frameworks: frameworks.into_iter().map(|f| f.code).collect(),
            verification_required: true,
            otp_sent,
        })
    }
}

/// Racing signups can pass the existence checks together; the unique index decides.
fn conflict_on_unique(e: sqlx::Error, message: &str) -> AuthError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::conflict(message),
        _ => AuthError::Database(e),
    }
}

fn validate(request: &SignupRequest<'_>) -> Result<(), AuthError> {
    if !is_valid_email(request.email.trim()) {
        return Err(AuthError::bad_request("Enter a valid email address"));
    }
    password::validate_strength(request.password).map_err(AuthError::BadRequest)?;

    if request.first_name.trim().chars().count() > MAX_NAME_LENGTH
        || request.last_name.trim().chars().count() > MAX_NAME_LENGTH
    {
        return Err(AuthError::bad_request(format!(
            "Names cannot be longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }

    let organization_name = request.organization_name.trim();
    if organization_name.is_empty() {
        return Err(AuthError::bad_request("Organization name cannot be empty"));
    }
    if organization_name.chars().count() > MAX_ORGANIZATION_NAME_LENGTH {
        return Err(AuthError::bad_request(format!(
            "Organization name cannot be longer than {} characters",
            MAX_ORGANIZATION_NAME_LENGTH
        )));
    }

    if !options::is_choice(&SECTORS, request.sector) {
        return Err(AuthError::bad_request(format!(
            "Invalid sector '{}'. Must be one of: {}",
            request.sector,
            options::list_values(&SECTORS)
        )));
    }
    if !options::is_choice(&REPORTING_FOCUSES, request.primary_reporting_focus) {
        return Err(AuthError::bad_request(format!(
            "Invalid primary_reporting_focus '{}'. Must be one of: {}",
            request.primary_reporting_focus,
            options::list_values(&REPORTING_FOCUSES)
        )));
    }

    if options::country(request.country.trim()).is_none() {
        return Err(AuthError::bad_request(format!(
            "'{}' is not a valid ISO 3166-1 country code",
            request.country.trim()
        )));
    }
    Ok(())
}

/// A loose shape check: one `@`, a non-empty local part, and a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}
