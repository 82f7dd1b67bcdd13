//! Regulatory frameworks and their assignment to organizations.

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RegulatoryFramework {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub jurisdiction: String,
    /// Empty for frameworks that apply to every sector.
    pub sector: String,
    pub priority: i64,
}

pub struct FrameworkStore;

impl FrameworkStore {
    /// Active frameworks that match a reporting focus and sector.
    ///
    /// NIGERIA picks the Nigerian frameworks for every sector plus those
    /// specific to `sector`. INTERNATIONAL picks the cross-sector
    /// international ones. HYBRID picks both, Nigerian first. Each group is
    /// ordered by descending priority, then name.
    pub async fn select_for(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        reporting_focus: &str,
        sector: &str,
    ) -> Result<Vec<RegulatoryFramework>, sqlx::Error> {
        let mut selected = Vec::new();

        if matches!(reporting_focus, "NIGERIA" | "HYBRID") {
            let nigerian: Vec<RegulatoryFramework> = sqlx::query_as(
                "SELECT id, code, name, jurisdiction, sector, priority FROM regulatory_frameworks
                 WHERE jurisdiction = 'NIGERIA' AND is_active = 1 AND (sector = '' OR sector = ?)
                 ORDER BY priority DESC, name",
            )
            .bind(sector)
            .fetch_all(&mut **tx)
            .await?;
            selected.extend(nigerian);
        }

        if matches!(reporting_focus, "INTERNATIONAL" | "HYBRID") {
            let international: Vec<RegulatoryFramework> = sqlx::query_as(
                "SELECT id, code, name, jurisdiction, sector, priority FROM regulatory_frameworks
                 WHERE jurisdiction = 'INTERNATIONAL' AND is_active = 1 AND sector = ''
                 ORDER BY priority DESC, name",
            )
            .fetch_all(&mut **tx)
            .await?;
            selected.extend(international);
        }

        Ok(selected)
    }

    /// Enable `frameworks` for an organization. The first becomes primary.
    pub async fn assign(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        organization_id: i64,
        frameworks: &[RegulatoryFramework],
        now: i64,
    ) -> Result<(), sqlx::Error> {
        for (index, framework) in frameworks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO organization_frameworks (organization_id, framework_id, is_primary, is_enabled, assigned_at)
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(organization_id)
            .bind(framework.id)
            .bind(index == 0)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewOrganization, OrganizationStore};

    use super::*;

    async fn codes_for(db: &Database, focus: &str, sector: &str) -> Vec<String> {
        let mut tx = db.begin().await.unwrap();
        let frameworks = FrameworkStore::select_for(&mut tx, focus, sector).await.unwrap();
        tx.rollback().await.unwrap();
        frameworks.into_iter().map(|f| f.code).collect()
    }

    #[tokio::test]
    async fn test_selection_by_focus_and_sector() {
        let db = Database::open(":memory:").await.unwrap();

        assert_eq!(
            codes_for(&db, "NIGERIA", "finance").await,
            vec!["NESREA", "CBN_ESG", "FMEnv", "NSE_ESG"]
        );
        assert_eq!(
            codes_for(&db, "NIGERIA", "oil_gas").await,
            vec!["NESREA", "DPR", "NUPRC", "FMEnv", "NSE_ESG"]
        );
        assert_eq!(
            codes_for(&db, "INTERNATIONAL", "oil_gas").await,
            vec!["GRI", "ISSB", "TCFD", "SASB", "CDP", "UN_SDG", "ISO14001", "IFC_PS"]
        );

        let hybrid = codes_for(&db, "HYBRID", "manufacturing").await;
        assert_eq!(hybrid.len(), 11);
        assert_eq!(hybrid[0], "NESREA");
        assert_eq!(hybrid[3], "GRI");
    }

    #[tokio::test]
    async fn test_inactive_frameworks_are_skipped() {
        let db = Database::open(":memory:").await.unwrap();
        sqlx::query("UPDATE regulatory_frameworks SET is_active = 0 WHERE code = 'NESREA'")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(codes_for(&db, "NIGERIA", "manufacturing").await[0], "FMEnv");
    }

    #[tokio::test]
    async fn test_assign_marks_first_primary() {
        let db = Database::open(":memory:").await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let org = OrganizationStore::insert(
            &mut tx,
            &NewOrganization {
                name: "Delta Refinery",
                sector: "oil_gas",
                country: "NG",
                primary_reporting_focus: "NIGERIA",
            },
            100,
        )
        .await
        .unwrap();
        let frameworks = FrameworkStore::select_for(&mut tx, "NIGERIA", "oil_gas")
            .await
            .unwrap();
        FrameworkStore::assign(&mut tx, org.id, &frameworks, 100)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let assigned: Vec<(String, bool, bool)> = sqlx::query_as(
            "SELECT f.code, a.is_primary, a.is_enabled FROM organization_frameworks a
             JOIN regulatory_frameworks f ON f.id = a.framework_id
             WHERE a.organization_id = ?
             ORDER BY a.id",
        )
        .bind(org.id)
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(assigned.len(), 5);
        assert_eq!(assigned[0], ("NESREA".to_string(), true, true));
        assert!(assigned[1..].iter().all(|(_, primary, enabled)| !primary && *enabled));
    }
}
