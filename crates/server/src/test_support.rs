use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sarpras_core::config::AppConfig;
use sarpras_core::dispatch::RecordingNotifier;
use sarpras_core::domain::booking::{BookingDetails, BookingDraft, BookingId, ResourceKind};
use sarpras_core::domain::time::{Interval, WireTimestamp};
use sarpras_core::domain::user::UserId;
use sarpras_core::workflow::service::SubmitRequest;
use sarpras_core::workflow::ApprovalService;
use sarpras_db::{
    connect_with_settings, migrations, DbPool, DemoSeedDataset, SqlResourceRepository,
    SqlTokenStore, SqlUserDirectory, SqlWorkflowStore,
};

pub const MANAGER_FINANCE_PHONE: &str = "081234500002";
pub const OPERATOR_PHONE: &str = "081234500005";

pub struct Seeded {
    pub pool: DbPool,
    pub notifier: RecordingNotifier,
    pub service: ApprovalService,
    pub resources: SqlResourceRepository,
}

pub async fn seeded() -> Seeded {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoSeedDataset::load(&pool).await.expect("seed");

    let notifier = RecordingNotifier::default();
    let service = ApprovalService::from_config(
        Arc::new(SqlWorkflowStore::new(pool.clone())),
        Arc::new(SqlUserDirectory::new(pool.clone())),
        Arc::new(SqlTokenStore::new(pool.clone())),
        Arc::new(notifier.clone()),
        &AppConfig::default().approval,
    )
    .expect("service");

    Seeded { resources: SqlResourceRepository::new(pool.clone()), pool, notifier, service }
}

pub fn window() -> (WireTimestamp, WireTimestamp) {
    let start = Utc.with_ymd_and_hms(2030, 6, 10, 1, 0, 0).single().expect("start");
    (start.into(), (start + Duration::hours(6)).into())
}

pub async fn submit_vehicle(seeded: &Seeded, requester: &str) -> BookingId {
    let resource = seeded
        .resources
        .find(ResourceKind::Vehicle, "veh-001")
        .await
        .expect("lookup")
        .expect("seeded vehicle");
    let (start, end) = window();
    let draft = BookingDraft {
        resource: resource.resource_ref(),
        interval: Interval::from_wire(start, end).expect("interval"),
        details: BookingDetails {
            activity: "Kunjungan klien".to_string(),
            participant_count: Some(4),
            destination: Some("Bandung".to_string()),
        },
    };

    seeded
        .service
        .submit(SubmitRequest { requester_uid: UserId(requester.to_string()), draft }, "test")
        .await
        .expect("submit")
        .outcome
        .booking
        .id
}

/// Secret from the newest link sent to `phone`.
pub fn last_secret(notifier: &RecordingNotifier, phone: &str) -> String {
    let sent = notifier.sent();
    let message = sent
        .iter()
        .rev()
        .find(|message| message.phone == phone)
        .map(|message| message.message.clone())
        .expect("message for phone");
    let start = message.find("token=").expect("token in link") + "token=".len();
    message[start..].chars().take_while(|c| c.is_ascii_hexdigit()).collect()
}
