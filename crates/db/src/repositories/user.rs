use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use sarpras_core::directory::UserDirectory;
use sarpras_core::domain::user::{Role, UserId, UserProfile};
use sarpras_core::workflow::store::StoreError;

use super::{decode_field, encode_timestamp, optional_text, text, RepositoryError};
use crate::DbPool;

/// Directory order is insertion order (`rowid`), which keeps "first user with
/// role X" stable across restarts.
#[derive(Clone)]
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, name, division, role, job_title, phone, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 division = excluded.division,
                 role = excluded.role,
                 job_title = excluded.job_title,
                 phone = excluded.phone",
        )
        .bind(&profile.id.0)
        .bind(&profile.name)
        .bind(&profile.division)
        .bind(profile.role.as_str())
        .bind(&profile.job_title)
        .bind(&profile.phone)
        .bind(encode_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<UserProfile>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, division, role, job_title, phone FROM app_user ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn fetch_one(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<UserProfile>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT id, name, division, role, job_title, phone FROM app_user
             WHERE {filter} ORDER BY rowid LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.fetch_one("id = ?", &id.0).await?)
    }

    async fn first_with_role(&self, role: Role) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.fetch_one("role = ?", role.as_str()).await?)
    }

    async fn division_manager(&self, division: &str) -> Result<Option<UserProfile>, StoreError> {
        let filter = "lower(trim(job_title)) IN ('manager', 'manajer')
                      AND lower(trim(division)) = lower(trim(?))";
        Ok(self.fetch_one(filter, division).await?)
    }
}

fn row_to_user(row: &SqliteRow) -> Result<UserProfile, RepositoryError> {
    Ok(UserProfile {
        id: UserId(text(row, "id")?),
        name: text(row, "name")?,
        division: text(row, "division")?,
        role: decode_field("role", &text(row, "role")?)?,
        job_title: text(row, "job_title")?,
        phone: optional_text(row, "phone")?,
    })
}

#[cfg(test)]
mod tests {
    use sarpras_core::directory::UserDirectory;
    use sarpras_core::domain::user::{Role, UserId, UserProfile};

    use super::SqlUserDirectory;
    use crate::{connect_with_settings, migrations};

    fn profile(id: &str, role: Role, job_title: &str, division: &str) -> UserProfile {
        UserProfile {
            id: UserId(id.to_string()),
            name: id.to_string(),
            division: division.to_string(),
            role,
            job_title: job_title.to_string(),
            phone: None,
        }
    }

    async fn directory() -> SqlUserDirectory {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserDirectory::new(pool)
    }

    #[tokio::test]
    async fn manager_lookup_matches_title_and_division_loosely() {
        let directory = directory().await;
        directory.save(&profile("staff", Role::Staff, "Staff", "Keuangan")).await.expect("save");
        directory.save(&profile("mgr-it", Role::Staff, "Manager", "IT")).await.expect("save");
        let loose = profile("mgr-fin", Role::Staff, " MANAJER ", "keuangan");
        directory.save(&loose).await.expect("save");

        let manager = directory.division_manager(" Keuangan ").await.expect("lookup");
        assert_eq!(manager.map(|user| user.id.0), Some("mgr-fin".to_string()));
        assert_eq!(directory.division_manager("Legal").await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn first_with_role_follows_insertion_order_across_updates() {
        let directory = directory().await;
        directory.save(&profile("op-b", Role::Operator, "Staff", "Umum")).await.expect("save");
        directory.save(&profile("op-a", Role::Operator, "Staff", "Umum")).await.expect("save");
        let mut renamed = profile("op-b", Role::Operator, "Staff", "Umum");
        renamed.phone = Some("081200000000".to_string());
        directory.save(&renamed).await.expect("update");

        let first = directory.first_with_role(Role::Operator).await.expect("lookup");
        assert_eq!(first, Some(renamed));
        assert_eq!(directory.first_with_role(Role::Admin).await.expect("lookup"), None);
        assert_eq!(directory.list().await.expect("list").len(), 2);
    }
}
