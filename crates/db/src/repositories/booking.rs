//! SQLite adapter for the workflow store.
//!
//! Transactions open with `BEGIN IMMEDIATE` so that two writers never both hold
//! a read snapshot they later try to upgrade; the second one waits on the
//! busy timeout instead of failing on lock upgrade.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use sarpras_core::audit::AuditEvent;
use sarpras_core::domain::booking::{Booking, BookingId, Rejection, ResourceKind, ResourceRef};
use sarpras_core::domain::time::Interval;
use sarpras_core::domain::token::TokenId;
use sarpras_core::workflow::stages::BookingStatus;
use sarpras_core::workflow::store::{StoreError, WorkflowStore, WorkflowTransaction};

use super::{
    decode_field, decode_json, decode_timestamp, encode_json, encode_timestamp, optional_text,
    text, RepositoryError,
};
use crate::DbPool;

const BOOKING_COLUMNS: &str = "id, resource_kind, resource_id, resource_name, start_at, end_at,
    requester_uid, requester_json, details_json, status, approval_json, rejection_json,
    created_at, updated_at";

#[derive(Clone)]
pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn audit_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, booking_id, correlation_id, event_type, category, actor, outcome,
                    metadata_json, occurred_at
             FROM audit_event WHERE booking_id = ? ORDER BY occurred_at, rowid",
        )
        .bind(&booking_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_audit).collect()
    }

    async fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn fetch_kind(&self, kind: ResourceKind) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE resource_kind = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_booking).collect()
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(RepositoryError::from)?;
        Ok(Box::new(SqlWorkflowTransaction { tx }))
    }

    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn list_bookings(&self, kind: ResourceKind) -> Result<Vec<Booking>, StoreError> {
        Ok(self.fetch_kind(kind).await?)
    }
}

pub struct SqlWorkflowTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqlWorkflowTransaction {
    async fn load(&mut self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn live_for_resource(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let live = BookingStatus::live_values();
        let placeholders = vec!["?"; live.len()].join(", ");
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE resource_kind = ? AND resource_id = ? AND status IN ({placeholders})
             ORDER BY created_at, id"
        );

        let mut query = sqlx::query(&sql).bind(kind.as_str()).bind(resource_id);
        for status in &live {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&mut *self.tx).await?;

        rows.iter().map(row_to_booking).collect()
    }

    async fn insert(&mut self, booking: &Booking) -> Result<(), RepositoryError> {
        let encoded = EncodedBooking::from_booking(booking)?;
        sqlx::query(
            "INSERT INTO booking (id, resource_kind, resource_id, resource_name, start_at, end_at,
                                  requester_uid, requester_json, details_json, status,
                                  approval_json, rejection_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking.id.0)
        .bind(booking.resource.kind.as_str())
        .bind(&booking.resource.id)
        .bind(&booking.resource.name)
        .bind(&encoded.start_at)
        .bind(&encoded.end_at)
        .bind(&booking.requester.uid.0)
        .bind(&encoded.requester_json)
        .bind(&encoded.details_json)
        .bind(booking.status.as_str())
        .bind(&encoded.approval_json)
        .bind(&encoded.rejection_json)
        .bind(&encoded.created_at)
        .bind(&encoded.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn compare_and_update(
        &mut self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<bool, RepositoryError> {
        let encoded = EncodedBooking::from_booking(booking)?;
        let result = sqlx::query(
            "UPDATE booking
             SET status = ?, details_json = ?, approval_json = ?, rejection_json = ?,
                 updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(booking.status.as_str())
        .bind(&encoded.details_json)
        .bind(&encoded.approval_json)
        .bind(&encoded.rejection_json)
        .bind(&encoded.updated_at)
        .bind(&booking.id.0)
        .bind(expected.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_token_used(
        &mut self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE approval_token SET used = 1, used_at = ? WHERE id = ? AND used = 0")
                .bind(encode_timestamp(now))
                .bind(&id.0)
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_audit(&mut self, event: &AuditEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO audit_event (id, booking_id, correlation_id, event_type, category, actor,
                                      outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.booking_id.0)
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(encode_json("metadata_json", &event.metadata)?)
        .bind(encode_timestamp(event.occurred_at))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowTransaction for SqlWorkflowTransaction {
    async fn load_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.load(id).await?)
    }

    async fn live_bookings_for_resource(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.live_for_resource(kind, resource_id).await?)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        Ok(self.insert(booking).await?)
    }

    async fn update_booking(
        &mut self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.compare_and_update(booking, expected).await?)
    }

    async fn consume_token(
        &mut self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.mark_token_used(id, now).await?)
    }

    async fn append_audit(&mut self, event: &AuditEvent) -> Result<(), StoreError> {
        Ok(self.insert_audit(event).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { tx } = *self;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

struct EncodedBooking {
    start_at: String,
    end_at: String,
    requester_json: String,
    details_json: String,
    approval_json: String,
    rejection_json: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EncodedBooking {
    fn from_booking(booking: &Booking) -> Result<Self, RepositoryError> {
        Ok(Self {
            start_at: encode_timestamp(booking.interval.start()),
            end_at: encode_timestamp(booking.interval.end()),
            requester_json: encode_json("requester_json", &booking.requester)?,
            details_json: encode_json("details_json", &booking.details)?,
            approval_json: encode_json("approval_json", &booking.approval)?,
            rejection_json: booking
                .rejection
                .as_ref()
                .map(|rejection| encode_json("rejection_json", rejection))
                .transpose()?,
            created_at: encode_timestamp(booking.created_at),
            updated_at: encode_timestamp(booking.updated_at),
        })
    }
}

fn row_to_booking(row: &SqliteRow) -> Result<Booking, RepositoryError> {
    let kind: ResourceKind = decode_field("resource_kind", &text(row, "resource_kind")?)?;
    let start = decode_timestamp("start_at", &text(row, "start_at")?)?;
    let end = decode_timestamp("end_at", &text(row, "end_at")?)?;
    let interval = Interval::new(start, end)
        .map_err(|error| RepositoryError::Decode(format!("interval: {error}")))?;
    let rejection = optional_text(row, "rejection_json")?
        .map(|raw| decode_json::<Rejection>("rejection_json", &raw))
        .transpose()?;

    Ok(Booking {
        id: BookingId(text(row, "id")?),
        resource: ResourceRef {
            kind,
            id: text(row, "resource_id")?,
            name: text(row, "resource_name")?,
        },
        interval,
        requester: decode_json("requester_json", &text(row, "requester_json")?)?,
        details: decode_json("details_json", &text(row, "details_json")?)?,
        status: decode_field("status", &text(row, "status")?)?,
        approval: decode_json("approval_json", &text(row, "approval_json")?)?,
        rejection,
        created_at: decode_timestamp("created_at", &text(row, "created_at")?)?,
        updated_at: decode_timestamp("updated_at", &text(row, "updated_at")?)?,
    })
}

fn row_to_audit(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    Ok(AuditEvent {
        event_id: text(row, "id")?,
        booking_id: BookingId(text(row, "booking_id")?),
        correlation_id: text(row, "correlation_id")?,
        event_type: text(row, "event_type")?,
        category: decode_field("category", &text(row, "category")?)?,
        actor: text(row, "actor")?,
        outcome: decode_field("outcome", &text(row, "outcome")?)?,
        metadata: decode_json("metadata_json", &text(row, "metadata_json")?)?,
        occurred_at: decode_timestamp("occurred_at", &text(row, "occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use sarpras_core::audit::{AuditCategory, AuditEvent, AuditOutcome, BOOKING_SUBMITTED};
    use sarpras_core::domain::booking::{
        Booking, BookingDetails, BookingDraft, BookingId, RequesterSnapshot, ResourceKind,
        ResourceRef,
    };
    use sarpras_core::domain::time::Interval;
    use sarpras_core::domain::user::{Role, UserId, UserProfile};
    use sarpras_core::workflow::stages::{BookingStatus, Stage};
    use sarpras_core::workflow::store::{StoreError, WorkflowStore, WorkflowTransaction};

    use super::SqlWorkflowStore;
    use crate::{connect_with_settings, migrations};

    async fn store() -> SqlWorkflowStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlWorkflowStore::new(pool)
    }

    fn booking(id: &str, resource_id: &str, status: BookingStatus, offset_min: i64) -> Booking {
        let start = Utc.with_ymd_and_hms(2030, 3, 2, 2, 0, 0).single().expect("start");
        let requester = UserProfile {
            id: UserId("usr-staff-001".to_string()),
            name: "Sari".to_string(),
            division: "Keuangan".to_string(),
            role: Role::Staff,
            job_title: "Staff".to_string(),
            phone: Some("081234500001".to_string()),
        };
        let mut booking = Booking::new(
            BookingId(id.to_string()),
            BookingDraft {
                resource: ResourceRef {
                    kind: ResourceKind::Room,
                    id: resource_id.to_string(),
                    name: "Ruang Rapat Utama".to_string(),
                },
                interval: Interval::new(start, start + Duration::hours(2)).expect("interval"),
                details: BookingDetails {
                    activity: "Rapat".to_string(),
                    participant_count: Some(12),
                    destination: None,
                },
            },
            RequesterSnapshot::from(&requester),
            start - Duration::days(3) + Duration::minutes(offset_min),
        );
        booking.status = status;
        booking
    }

    #[tokio::test]
    async fn committed_booking_reads_back_identically() {
        let store = store().await;
        let original = booking("BK-1", "room-001", BookingStatus::Waiting(Stage::Manager), 0);

        let mut tx = store.begin().await.expect("begin");
        tx.insert_booking(&original).await.expect("insert");
        tx.commit().await.expect("commit");

        assert_eq!(store.find_booking(&original.id).await.expect("find"), Some(original));
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = store().await;
        let draft = booking("BK-2", "room-001", BookingStatus::Waiting(Stage::Manager), 0);

        {
            let mut tx = store.begin().await.expect("begin");
            tx.insert_booking(&draft).await.expect("insert");
        }

        assert_eq!(store.find_booking(&draft.id).await.expect("find"), None);
    }

    #[tokio::test]
    async fn update_is_compare_and_swap_on_status() {
        let store = store().await;
        let mut current = booking("BK-3", "room-001", BookingStatus::Waiting(Stage::Operator), 0);
        let mut tx = store.begin().await.expect("begin");
        tx.insert_booking(&current).await.expect("insert");
        tx.commit().await.expect("commit");

        current.status = BookingStatus::Waiting(Stage::Admin);
        let mut tx = store.begin().await.expect("begin");
        let stale = tx
            .update_booking(&current, BookingStatus::Waiting(Stage::Manager))
            .await
            .expect("cas");
        let fresh = tx
            .update_booking(&current, BookingStatus::Waiting(Stage::Operator))
            .await
            .expect("cas");
        tx.commit().await.expect("commit");

        assert!(!stale);
        assert!(fresh);
        let stored = store.find_booking(&current.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, BookingStatus::Waiting(Stage::Admin));
    }

    #[tokio::test]
    async fn live_scan_skips_terminal_and_other_resources() {
        let store = store().await;
        let mut tx = store.begin().await.expect("begin");
        for candidate in [
            booking("BK-A", "room-001", BookingStatus::Waiting(Stage::Manager), 0),
            booking("BK-B", "room-001", BookingStatus::Approved, 1),
            booking("BK-C", "room-001", BookingStatus::Rejected, 2),
            booking("BK-D", "room-001", BookingStatus::Done, 3),
            booking("BK-E", "room-002", BookingStatus::Approved, 4),
        ] {
            tx.insert_booking(&candidate).await.expect("insert");
        }

        let live =
            tx.live_bookings_for_resource(ResourceKind::Room, "room-001").await.expect("scan");
        let ids: Vec<&str> = live.iter().map(|booking| booking.id.0.as_str()).collect();
        assert_eq!(ids, vec!["BK-A", "BK-B"]);
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported_as_duplicate() {
        let store = store().await;
        let original = booking("BK-4", "room-001", BookingStatus::Waiting(Stage::Manager), 0);
        let mut tx = store.begin().await.expect("begin");
        tx.insert_booking(&original).await.expect("insert");

        let second = tx.insert_booking(&original).await;
        assert!(matches!(second, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_audit_is_persisted() {
        let store = store().await;
        let older = booking("BK-OLD", "room-001", BookingStatus::Waiting(Stage::Manager), 0);
        let newer = booking("BK-NEW", "room-002", BookingStatus::Waiting(Stage::Manager), 30);
        let mut tx = store.begin().await.expect("begin");
        tx.insert_booking(&older).await.expect("insert");
        tx.insert_booking(&newer).await.expect("insert");
        tx.append_audit(
            &AuditEvent::new(
                older.id.clone(),
                "req-1",
                BOOKING_SUBMITTED,
                AuditCategory::Submission,
                "usr-staff-001",
                AuditOutcome::Success,
                Utc::now(),
            )
            .with_metadata("status", "WAITING_STAGE_1"),
        )
        .await
        .expect("audit");
        tx.commit().await.expect("commit");

        let listed = store.list_bookings(ResourceKind::Room).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|booking| booking.id.0.as_str()).collect();
        assert_eq!(ids, ["BK-NEW", "BK-OLD"]);
        assert!(store.list_bookings(ResourceKind::Vehicle).await.expect("list").is_empty());

        let audit = store.audit_for_booking(&older.id).await.expect("audit");
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event_type, BOOKING_SUBMITTED);
        assert_eq!(audit[0].metadata.get("status").map(String::as_str), Some("WAITING_STAGE_1"));
    }
}
