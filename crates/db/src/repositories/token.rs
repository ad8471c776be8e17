use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use sarpras_core::domain::booking::BookingId;
use sarpras_core::domain::token::{ApprovalToken, TokenId};
use sarpras_core::tokens::TokenStore;
use sarpras_core::workflow::store::StoreError;

use super::{
    decode_field, decode_json, decode_timestamp, encode_json, encode_timestamp, optional_text,
    text, RepositoryError,
};
use crate::DbPool;

#[derive(Clone)]
pub struct SqlTokenStore {
    pool: DbPool,
}

impl SqlTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, token: &ApprovalToken) -> Result<(), RepositoryError> {
        let approver_json = token
            .approver
            .as_ref()
            .map(|approver| encode_json("approver_json", approver))
            .transpose()?;

        sqlx::query(
            "INSERT INTO approval_token (id, booking_id, resource_kind, stage, approver_json,
                                         secret_digest, used, created_at, expires_at, used_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.id.0)
        .bind(&token.booking_id.0)
        .bind(token.resource_kind.as_str())
        .bind(token.stage.name())
        .bind(&approver_json)
        .bind(&token.secret_digest)
        .bind(token.used)
        .bind(encode_timestamp(token.created_at))
        .bind(encode_timestamp(token.expires_at))
        .bind(token.used_at.map(encode_timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        booking_id: &BookingId,
        secret_digest: &str,
    ) -> Result<Option<ApprovalToken>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, booking_id, resource_kind, stage, approver_json, secret_digest, used,
                    created_at, expires_at, used_at
             FROM approval_token WHERE booking_id = ? AND secret_digest = ?",
        )
        .bind(&booking_id.0)
        .bind(secret_digest)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_token).transpose()
    }
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StoreError> {
        Ok(self.insert(token).await?)
    }

    async fn find_token(
        &self,
        booking_id: &BookingId,
        secret_digest: &str,
    ) -> Result<Option<ApprovalToken>, StoreError> {
        Ok(self.find(booking_id, secret_digest).await?)
    }
}

fn row_to_token(row: &SqliteRow) -> Result<ApprovalToken, RepositoryError> {
    let used: bool =
        row.try_get("used").map_err(|error| RepositoryError::Decode(format!("used: {error}")))?;

    Ok(ApprovalToken {
        id: TokenId(text(row, "id")?),
        booking_id: BookingId(text(row, "booking_id")?),
        resource_kind: decode_field("resource_kind", &text(row, "resource_kind")?)?,
        stage: decode_field("stage", &text(row, "stage")?)?,
        approver: optional_text(row, "approver_json")?
            .map(|raw| decode_json("approver_json", &raw))
            .transpose()?,
        secret_digest: text(row, "secret_digest")?,
        used,
        created_at: decode_timestamp("created_at", &text(row, "created_at")?)?,
        expires_at: decode_timestamp("expires_at", &text(row, "expires_at")?)?,
        used_at: optional_text(row, "used_at")?
            .map(|raw| decode_timestamp("used_at", &raw))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use sarpras_core::domain::booking::{BookingId, ResourceKind};
    use sarpras_core::domain::user::{ApproverRef, UserId};
    use sarpras_core::tokens::{TokenError, TokenService};
    use sarpras_core::workflow::stages::Stage;
    use sarpras_core::workflow::store::{WorkflowStore, WorkflowTransaction};

    use super::SqlTokenStore;
    use crate::repositories::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool_with_booking(id: &str) -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        sqlx::query(
            "INSERT INTO booking (id, resource_kind, resource_id, resource_name, start_at, end_at,
                                  requester_uid, requester_json, details_json, status,
                                  approval_json, created_at, updated_at)
             VALUES (?, 'vehicle', 'veh-001', 'Toyota Avanza', '2030-01-01T01:00:00Z',
                     '2030-01-01T05:00:00Z', 'usr-staff-001', '{}', '{}', 'WAITING_STAGE_2',
                     '[]', '2029-12-30T00:00:00Z', '2029-12-30T00:00:00Z')",
        )
        .bind(id)
        .execute(&pool)
        .await
        .expect("seed booking row");
        pool
    }

    fn operator() -> ApproverRef {
        ApproverRef {
            uid: UserId("usr-op-001".to_string()),
            name: "Rudi".to_string(),
            contact: Some("081234500005".to_string()),
        }
    }

    #[tokio::test]
    async fn issued_token_verifies_and_is_consumed_once() {
        let pool = pool_with_booking("BK-T1").await;
        let tokens =
            TokenService::new(Arc::new(SqlTokenStore::new(pool.clone())), Duration::hours(24));
        let workflow = SqlWorkflowStore::new(pool);
        let booking_id = BookingId("BK-T1".to_string());
        let now = Utc::now();

        let issued = tokens
            .issue(&booking_id, ResourceKind::Vehicle, Stage::Operator, Some(operator()), now)
            .await
            .expect("issue");
        let verified = tokens.verify(&booking_id, &issued.secret, now).await.expect("verify");
        assert_eq!(verified, issued.token);
        assert_eq!(verified.approver, Some(operator()));

        let mut tx = workflow.begin().await.expect("begin");
        tokens.consume(tx.as_mut(), &verified, now).await.expect("first consume");
        tx.commit().await.expect("commit");

        let mut tx = workflow.begin().await.expect("begin");
        let second = tokens.consume(tx.as_mut(), &verified, now).await;
        assert_eq!(second, Err(TokenError::AlreadyUsed));
        drop(tx);

        assert_eq!(
            tokens.verify(&booking_id, &issued.secret, now).await,
            Err(TokenError::AlreadyUsed)
        );
    }

    #[tokio::test]
    async fn token_is_scoped_to_its_booking_and_lifetime() {
        let pool = pool_with_booking("BK-T2").await;
        let tokens = TokenService::new(Arc::new(SqlTokenStore::new(pool)), Duration::hours(24));
        let booking_id = BookingId("BK-T2".to_string());
        let now = Utc::now();
        let issued = tokens
            .issue(&booking_id, ResourceKind::Vehicle, Stage::Operator, Some(operator()), now)
            .await
            .expect("issue");

        assert_eq!(
            tokens.verify(&BookingId("BK-OTHER".to_string()), &issued.secret, now).await,
            Err(TokenError::NotFound)
        );
        assert_eq!(
            tokens.verify(&booking_id, &issued.secret, now + Duration::hours(24)).await,
            Err(TokenError::Expired)
        );
    }
}
