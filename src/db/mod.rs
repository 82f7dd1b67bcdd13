mod framework;
mod organization;
mod otp;
mod token;
mod user;

use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use organization::{
    Membership, MembershipDetail, NewOrganization, Organization, OrganizationStore, Role,
    RoleStore,
};
pub use framework::{FrameworkStore, RegulatoryFramework};
pub use otp::{OtpPurpose, OtpRecord, OtpStore};
pub use token::{NewRefreshToken, RefreshTokenRecord, TokenStore};
pub use user::{NewUser, User, UserStore};

/// Bound on waiting for a pooled connection. Store calls fail rather than hang.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        if version < 3 {
            self.migrate_v3().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Users table
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                // Organizations table
                "CREATE TABLE organizations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    name TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    sector TEXT NOT NULL,
                    country TEXT NOT NULL,
                    primary_reporting_focus TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL
                )",
                // Roles and their capabilities
                "CREATE TABLE roles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT UNIQUE NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    is_system INTEGER NOT NULL DEFAULT 0
                )",
                "CREATE TABLE capabilities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT UNIQUE NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT ''
                )",
                "CREATE TABLE role_capabilities (
                    role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                    capability_id INTEGER NOT NULL REFERENCES capabilities(id) ON DELETE CASCADE,
                    PRIMARY KEY (role_id, capability_id)
                )",
                // Memberships join users to organizations with a role
                "CREATE TABLE memberships (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    role_id INTEGER NOT NULL REFERENCES roles(id),
                    is_active INTEGER NOT NULL DEFAULT 1,
                    joined_at INTEGER NOT NULL,
                    UNIQUE (user_id, organization_id, role_id)
                )",
                "CREATE INDEX idx_memberships_user ON memberships(user_id, is_active)",
                "CREATE INDEX idx_memberships_org ON memberships(organization_id, is_active)",
            ],
        )
        .await
    }

    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                // Refresh token allowlist. Rows are never deleted (audit trail).
                "CREATE TABLE refresh_tokens (
                    jti TEXT PRIMARY KEY NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    revoked INTEGER NOT NULL DEFAULT 0,
                    replaced_by TEXT,
                    ip_address TEXT,
                    user_agent TEXT
                )",
                "CREATE INDEX idx_refresh_tokens_user ON refresh_tokens(user_id, revoked)",
                "CREATE INDEX idx_refresh_tokens_expires ON refresh_tokens(expires_at)",
                // One-time codes for email verification
                "CREATE TABLE email_verifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    hashed_otp TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    verified_at INTEGER,
                    attempts INTEGER NOT NULL DEFAULT 0
                )",
                "CREATE INDEX idx_email_verifications_user ON email_verifications(user_id, created_at)",
                // One-time codes for password resets
                "CREATE TABLE password_resets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    hashed_otp TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    used_at INTEGER,
                    attempts INTEGER NOT NULL DEFAULT 0
                )",
                "CREATE INDEX idx_password_resets_user ON password_resets(user_id, created_at)",
            ],
        )
        .await
    }

    async fn migrate_v3(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            3,
            &[
                // Regulatory frameworks. An empty sector applies to every sector.
                "CREATE TABLE regulatory_frameworks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    code TEXT UNIQUE NOT NULL,
                    name TEXT NOT NULL,
                    jurisdiction TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    sector TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 0
                )",
                "CREATE TABLE organization_frameworks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
                    framework_id INTEGER NOT NULL REFERENCES regulatory_frameworks(id),
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    is_enabled INTEGER NOT NULL DEFAULT 1,
                    assigned_at INTEGER NOT NULL,
                    assigned_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    UNIQUE (organization_id, framework_id)
                )",
                "CREATE INDEX idx_organization_frameworks_org ON organization_frameworks(organization_id)",
                "INSERT INTO regulatory_frameworks (code, name, jurisdiction, description, sector, priority) VALUES
                    ('NESREA', 'National Environmental Standards and Regulations Enforcement Agency', 'NIGERIA', 'Nigeria''s primary environmental regulator enforcing environmental standards', '', 100),
                    ('CBN_ESG', 'Central Bank of Nigeria ESG Guidelines', 'NIGERIA', 'CBN environmental and social risk management guidelines for financial institutions', 'finance', 90),
                    ('DPR', 'Department of Petroleum Resources', 'NIGERIA', 'Regulates oil and gas environmental compliance in Nigeria', 'oil_gas', 90),
                    ('NUPRC', 'Nigerian Upstream Petroleum Regulatory Commission', 'NIGERIA', 'Regulates upstream petroleum operations including environmental standards', 'oil_gas', 85),
                    ('FMEnv', 'Federal Ministry of Environment', 'NIGERIA', 'National environmental policy and EIA requirements', '', 80),
                    ('NSE_ESG', 'Nigerian Exchange ESG Disclosure Guidelines', 'NIGERIA', 'ESG disclosure requirements for listed companies', '', 75),
                    ('GRI', 'Global Reporting Initiative (GRI Standards)', 'INTERNATIONAL', 'World''s most widely used sustainability reporting standards', '', 100),
                    ('ISSB', 'International Sustainability Standards Board (IFRS S1 & S2)', 'INTERNATIONAL', 'IFRS sustainability disclosure standards for capital markets', '', 95),
                    ('TCFD', 'Task Force on Climate-related Financial Disclosures', 'INTERNATIONAL', 'Framework for climate-related financial risk disclosures', '', 90),
                    ('SASB', 'Sustainability Accounting Standards Board', 'INTERNATIONAL', 'Industry-specific sustainability accounting standards', '', 85),
                    ('CDP', 'Carbon Disclosure Project', 'INTERNATIONAL', 'Global disclosure system for environmental impact', '', 80),
                    ('UN_SDG', 'UN Sustainable Development Goals', 'INTERNATIONAL', '17 global goals for sustainable development', '', 75),
                    ('ISO14001', 'ISO 14001 Environmental Management', 'INTERNATIONAL', 'International standard for environmental management systems', '', 70),
                    ('IFC_PS', 'IFC Performance Standards', 'INTERNATIONAL', 'Environmental and social sustainability standards for private sector', '', 65)",
                // System roles and what each may do
                "INSERT OR IGNORE INTO capabilities (code, name, description) VALUES
                    ('manage_organization', 'Manage Organization', 'Can update organization settings, sector config'),
                    ('manage_users', 'Manage Users', 'Can invite users, assign roles, manage memberships'),
                    ('configure_esg', 'Configure ESG Settings', 'Can configure scopes, permits, frameworks'),
                    ('manage_targets', 'Manage Targets', 'Can create and edit ESG targets'),
                    ('submit_environmental', 'Submit Environmental Data', 'Can submit emissions, energy, waste, water data'),
                    ('submit_social', 'Submit Social Data', 'Can submit workforce, training, HSE data'),
                    ('submit_governance', 'Submit Governance Data', 'Can submit board, policy, compliance data'),
                    ('view_dashboards', 'View Dashboards', 'Can view ESG dashboards and reports'),
                    ('review_submissions', 'Review Submissions', 'Can review and approve data submissions')",
                "INSERT OR IGNORE INTO roles (code, name, description, is_system) VALUES
                    ('org_admin', 'Organization Administrator', 'Full control over organization settings, users, and data', 1),
                    ('environmental_officer', 'Environmental Officer', 'Submits and manages environmental data', 1),
                    ('social_officer', 'Social Officer', 'Submits and manages social data', 1),
                    ('governance_officer', 'Governance Officer', 'Submits and manages governance data', 1),
                    ('auditor', 'Auditor / Reviewer', 'Reviews submissions and provides oversight', 1)",
                "WITH grants (role_code, capability_code) AS (VALUES
                    ('org_admin', 'manage_organization'),
                    ('org_admin', 'manage_users'),
                    ('org_admin', 'configure_esg'),
                    ('org_admin', 'manage_targets'),
                    ('org_admin', 'view_dashboards'),
                    ('environmental_officer', 'submit_environmental'),
                    ('environmental_officer', 'view_dashboards'),
                    ('social_officer', 'submit_social'),
                    ('social_officer', 'view_dashboards'),
                    ('governance_officer', 'submit_governance'),
                    ('governance_officer', 'view_dashboards'),
                    ('auditor', 'review_submissions'),
                    ('auditor', 'view_dashboards')
                )
                INSERT OR IGNORE INTO role_capabilities (role_id, capability_id)
                SELECT r.id, c.id FROM grants g
                JOIN roles r ON r.code = g.role_code
                JOIN capabilities c ON c.code = g.capability_code",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the organization store.
    pub fn organizations(&self) -> OrganizationStore {
        OrganizationStore::new(self.pool.clone())
    }

    /// Get the refresh token store.
    pub fn tokens(&self) -> TokenStore {
        TokenStore::new(self.pool.clone())
    }

    /// Get the one-time code store for a purpose.
    pub fn otps(&self, purpose: OtpPurpose) -> OtpStore {
        OtpStore::new(self.pool.clone(), purpose)
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a new transaction.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }
}
