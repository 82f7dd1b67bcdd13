//! Organizations, system roles and the memberships tying users to them.

use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub sector: String,
    pub country: String,
    pub primary_reporting_focus: String,
    pub is_active: bool,
}

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: i64,
    uuid: String,
    name: String,
    sector: String,
    country: String,
    primary_reporting_focus: String,
    is_active: i32,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            sector: row.sector,
            country: row.country,
            primary_reporting_focus: row.primary_reporting_focus,
            is_active: row.is_active != 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrganization<'a> {
    pub name: &'a str,
    pub sector: &'a str,
    pub country: &'a str,
    pub primary_reporting_focus: &'a str,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Role {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// The membership used to fill access token claims.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: i64,
    pub organization_uuid: String,
    pub role_code: String,
    pub role_name: String,
}

/// A membership as shown to the member, with the role's capability codes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MembershipDetail {
    pub organization_id: String,
    pub organization_name: String,
    pub role: String,
    pub role_name: String,
    pub capabilities: Vec<String>,
}

#[derive(Clone)]
pub struct OrganizationStore {
    pool: SqlitePool,
}

impl OrganizationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an active organization inside an open transaction.
    pub async fn insert(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        org: &NewOrganization<'_>,
        now: i64,
    ) -> Result<Organization, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let name = org.name.trim();
        let result = sqlx::query(
            "INSERT INTO organizations (uuid, name, sector, country, primary_reporting_focus, is_active, created_at) VALUES (?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(&uuid)
        .bind(name)
        .bind(org.sector)
        .bind(org.country)
        .bind(org.primary_reporting_focus)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(Organization {
            id: result.last_insert_rowid(),
            uuid,
            name: name.to_string(),
            sector: org.sector.to_string(),
            country: org.country.to_string(),
            primary_reporting_focus: org.primary_reporting_focus.to_string(),
            is_active: true,
        })
    }

    /// Check whether an organization name is taken (case-insensitive).
    pub async fn name_exists(&self, name: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM organizations WHERE name = ?")
            .bind(name.trim())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Organization>, sqlx::Error> {
        let row: Option<OrganizationRow> = sqlx::query_as(
            "SELECT id, uuid, name, sector, country, primary_reporting_focus, is_active FROM organizations WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Organization::from))
    }

    /// Add an active membership inside an open transaction.
    pub async fn add_member(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: i64,
        organization_id: i64,
        role_id: i64,
        now: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO memberships (user_id, organization_id, role_id, is_active, joined_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(user_id)
        .bind(organization_id)
        .bind(role_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The user's first active membership in an active organization, by join time.
    pub async fn get_active_membership(
        &self,
        user_id: i64,
    ) -> Result<Option<Membership>, sqlx::Error> {
        sqlx::query_as(
            "SELECT m.id, m.user_id, m.organization_id, o.uuid AS organization_uuid, r.code AS role_code, r.name AS role_name
             FROM memberships m
             JOIN organizations o ON o.id = m.organization_id
             JOIN roles r ON r.id = m.role_id
             WHERE m.user_id = ? AND m.is_active = 1 AND o.is_active = 1
             ORDER BY m.joined_at, m.id
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All active memberships of a user with the capabilities of each role.
    pub async fn list_memberships(
        &self,
        user_id: i64,
    ) -> Result<Vec<MembershipDetail>, sqlx::Error> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            "SELECT r.id, o.uuid, o.name, r.code, r.name
             FROM memberships m
             JOIN organizations o ON o.id = m.organization_id
             JOIN roles r ON r.id = m.role_id
             WHERE m.user_id = ? AND m.is_active = 1 AND o.is_active = 1
             ORDER BY m.joined_at, m.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut memberships = Vec::with_capacity(rows.len());
        for (role_id, organization_id, organization_name, role, role_name) in rows {
            let capabilities: Vec<(String,)> = sqlx::query_as(
                "SELECT c.code FROM role_capabilities rc
                 JOIN capabilities c ON c.id = rc.capability_id
                 WHERE rc.role_id = ?
                 ORDER BY c.code",
            )
            .bind(role_id)
            .fetch_all(&self.pool)
            .await?;

            memberships.push(MembershipDetail {
                organization_id,
                organization_name,
                role,
                role_name,
                capabilities: capabilities.into_iter().map(|(code,)| code).collect(),
            });
        }
        Ok(memberships)
    }
}

pub struct RoleStore;

impl RoleStore {
    /// Fetch a system role by code, creating it if missing.
    pub async fn get_or_create(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        code: &str,
        name: &str,
    ) -> Result<Role, sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO roles (code, name, is_system) VALUES (?, ?, 1)")
            .bind(code)
            .bind(name)
            .execute(&mut **tx)
            .await?;
        sqlx::query_as("SELECT id, code, name FROM roles WHERE code = ?")
            .bind(code)
            .fetch_one(&mut **tx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewUser};

    use super::*;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create(
                &NewUser {
                    email: "grace@example.com",
                    password_hash: "x",
                    first_name: "Grace",
                    last_name: "Hopper",
                },
                100,
            )
            .await
            .unwrap();
        (db, user.id)
    }

    async fn join(db: &Database, user_id: i64, org_name: &str, role: &str, now: i64) -> Organization {
        let mut tx = db.begin().await.unwrap();
        let org = OrganizationStore::insert(
            &mut tx,
            &NewOrganization {
                name: org_name,
                sector: "finance",
                country: "NG",
                primary_reporting_focus: "NIGERIA",
            },
            now,
        )
        .await
        .unwrap();
        let role = RoleStore::get_or_create(&mut tx, role, "Some Role").await.unwrap();
        OrganizationStore::add_member(&mut tx, user_id, org.id, role.id, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        org
    }

    #[tokio::test]
    async fn test_no_membership() {
        let (db, user_id) = setup().await;
        assert!(
            db.organizations()
                .get_active_membership(user_id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(db.organizations().list_memberships(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_active_membership_wins() {
        let (db, user_id) = setup().await;
        let first = join(&db, user_id, "Acme", "org_admin", 200).await;
        join(&db, user_id, "Globex", "viewer", 300).await;

        let membership = db
            .organizations()
            .get_active_membership(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.organization_uuid, first.uuid);
        assert_eq!(membership.role_code, "org_admin");
    }

    #[tokio::test]
    async fn test_inactive_organization_is_skipped() {
        let (db, user_id) = setup().await;
        let first = join(&db, user_id, "Acme", "org_admin", 200).await;
        let second = join(&db, user_id, "Globex", "viewer", 300).await;
        sqlx::query("UPDATE organizations SET is_active = 0 WHERE id = ?")
            .bind(first.id)
            .execute(db.pool())
            .await
            .unwrap();

        let membership = db
            .organizations()
            .get_active_membership(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.organization_uuid, second.uuid);
    }

    #[tokio::test]
    async fn test_list_memberships_with_capabilities() {
        let (db, user_id) = setup().await;
        join(&db, user_id, "Acme", "environmental_officer", 200).await;
        join(&db, user_id, "Globex", "custom_role", 300).await;

        let memberships = db.organizations().list_memberships(user_id).await.unwrap();
        assert_eq!(memberships.len(), 2);
        assert_eq!(memberships[0].organization_name, "Acme");
        assert_eq!(memberships[0].role_name, "Environmental Officer");
        assert_eq!(
            memberships[0].capabilities,
            vec!["submit_environmental".to_string(), "view_dashboards".to_string()]
        );
        assert!(memberships[1].capabilities.is_empty());
    }

    #[tokio::test]
    async fn test_organization_name_is_case_insensitive() {
        let (db, user_id) = setup().await;
        join(&db, user_id, "Acme", "org_admin", 200).await;
        assert!(db.organizations().name_exists("ACME").await.unwrap());
        assert!(!db.organizations().name_exists("Initech").await.unwrap());
    }
}
