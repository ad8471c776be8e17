use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Users the demo dataset must contain.
const SEED_USERS: &[SeedUser] = &[
    SeedUser { id: "usr-staff-001", role: "staff", job_title: "Staff", division: "Keuangan" },
    SeedUser { id: "usr-mgr-001", role: "staff", job_title: "Manager", division: "Keuangan" },
    SeedUser { id: "usr-staff-002", role: "staff", job_title: "Staff", division: "IT" },
    SeedUser { id: "usr-mgr-002", role: "staff", job_title: "Manager", division: "IT" },
    SeedUser { id: "usr-op-001", role: "operator", job_title: "Staff", division: "Umum" },
    SeedUser { id: "usr-admin-001", role: "admin", job_title: "Staff", division: "Umum" },
];

const SEED_RESOURCES: &[(&str, &str)] = &[
    ("room", "room-001"),
    ("room", "room-002"),
    ("room", "room-003"),
    ("vehicle", "veh-001"),
    ("vehicle", "veh-002"),
];

/// Demo directory plus room and vehicle catalog.
///
/// Every division with staff also has a manager, and there is exactly one
/// operator and one admin, so each stage of the pipeline has an approver.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(Self::SQL).execute(&mut *tx).await?;
        tx.commit().await?;

        tracing::info!(
            event_name = "db.seed.loaded",
            users = SEED_USERS.len(),
            resources = SEED_RESOURCES.len(),
            "demo dataset loaded"
        );

        Ok(SeedResult {
            users_seeded: SEED_USERS.iter().map(|user| user.id).collect(),
            resources_seeded: SEED_RESOURCES.iter().map(|(_, id)| *id).collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for user in SEED_USERS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user
                               WHERE id = ?1 AND role = ?2 AND job_title = ?3 AND division = ?4)",
            )
            .bind(user.id)
            .bind(user.role)
            .bind(user.job_title)
            .bind(user.division)
            .fetch_one(pool)
            .await?;
            checks.push((user.id, present == 1));
        }

        for (kind, id) in SEED_RESOURCES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM resource WHERE kind = ?1 AND id = ?2)",
            )
            .bind(*kind)
            .bind(*id)
            .fetch_one(pool)
            .await?;
            checks.push((*id, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded rows. Bookings referencing them are left alone.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let user_ids = sql_array_from_ids(SEED_USERS.iter().map(|user| user.id));
        let resource_ids = sql_array_from_ids(SEED_RESOURCES.iter().map(|(_, id)| *id));
        sqlx::query(&format!("DELETE FROM app_user WHERE id IN {user_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM resource WHERE id IN {resource_ids}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedUser {
    id: &'static str,
    role: &'static str,
    job_title: &'static str,
    division: &'static str,
}

fn sql_array_from_ids<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let quoted = ids.map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub users_seeded: Vec<&'static str>,
    pub resources_seeded: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use sarpras_core::directory::UserDirectory;
    use sarpras_core::domain::booking::ResourceKind;
    use sarpras_core::domain::user::Role;

    use super::DemoSeedDataset;
    use crate::repositories::{SqlResourceRepository, SqlUserDirectory};
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_present() {
        assert!(DemoSeedDataset::SQL.contains("INSERT INTO app_user"));
        assert!(DemoSeedDataset::SQL.contains("INSERT INTO resource"));
    }

    #[tokio::test]
    async fn seed_is_verifiable_and_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        DemoSeedDataset::load(&pool).await.expect("first load");
        DemoSeedDataset::load(&pool).await.expect("second load");
        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "{:?}", verification.checks);

        let users: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM app_user").fetch_one(&pool).await.expect("n");
        assert_eq!(users, 6);

        DemoSeedDataset::clean(&pool).await.expect("clean");
        assert!(!DemoSeedDataset::verify(&pool).await.expect("verify").all_present);
    }

    #[tokio::test]
    async fn seeded_directory_covers_every_stage() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("load");
        let directory = SqlUserDirectory::new(pool.clone());

        let manager = directory.division_manager("Keuangan").await.expect("manager");
        assert_eq!(manager.map(|user| user.id.0), Some("usr-mgr-001".to_string()));
        let operator = directory.first_with_role(Role::Operator).await.expect("operator");
        assert_eq!(operator.map(|user| user.id.0), Some("usr-op-001".to_string()));
        let admin = directory.first_with_role(Role::Admin).await.expect("admin");
        assert!(admin.and_then(|user| user.phone).is_some());

        let vehicles =
            SqlResourceRepository::new(pool).list(ResourceKind::Vehicle).await.expect("list");
        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].plate_number.as_deref(), Some("B 1234 XYZ"));
    }
}
