//! Composes approval requests and hands them to the outbound notifier.
//!
//! Dispatch is best-effort relative to workflow transitions: callers that
//! notify after a commit log failures instead of surfacing them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::domain::booking::{Booking, BookingId, ResourceKind};
use crate::domain::user::ApproverRef;
use crate::tokens::{IssuedToken, TokenError, TokenService};
use crate::workflow::stages::{BookingStatus, Stage};
use crate::workflow::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("recipient `{0}` is not a valid phone number")]
    InvalidRecipient(String),
    #[error("gateway rejected message with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
    #[error("gateway transport failed: {0}")]
    Transport(String),
}

/// Outbound messaging transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("booking `{0}` not found")]
    BookingNotFound(BookingId),
    #[error("booking `{booking_id}` is {actual}, not waiting at the {stage} stage")]
    NotWaiting { booking_id: BookingId, stage: Stage, actual: BookingStatus },
    #[error("no approver could be resolved for the {stage} stage")]
    NoApprover { stage: Stage },
    #[error("approver for the {stage} stage has no contact number")]
    MissingContact { stage: Stage },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Notifier(#[from] NotifyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn user_message(&self) -> String {
        match self {
            Self::BookingNotFound(_) => "Booking tidak ditemukan".to_string(),
            Self::NotWaiting { .. } => {
                "Booking tidak sedang menunggu persetujuan tahap ini".to_string()
            }
            Self::NoApprover { stage } => {
                format!("Belum ada approver untuk tahap {}", stage_title(*stage))
            }
            Self::MissingContact { stage } => {
                format!("Approver tahap {} belum memiliki nomor WhatsApp", stage_title(*stage))
            }
            Self::Token(error) => error.user_message(),
            Self::Notifier(_) => "Gagal mengirim notifikasi WhatsApp".to_string(),
            Self::Store(_) => "Terjadi kesalahan internal".to_string(),
        }
    }
}

/// What happened to the notification that follows a committed transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationReport {
    NotRequired,
    Sent { stage: Stage, approver: ApproverRef },
    Unresolved { stage: Stage },
    Failed { stage: Stage, reason: String },
}

impl NotificationReport {
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::NotRequired | Self::Sent { .. } => None,
            Self::Unresolved { stage } => {
                Some(format!("Belum ada approver untuk tahap {}", stage_title(*stage)))
            }
            Self::Failed { stage, .. } => Some(format!(
                "Notifikasi untuk tahap {} gagal dikirim",
                stage_title(*stage)
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DispatchReceipt {
    pub issued: IssuedToken,
    pub link: String,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    tokens: TokenService,
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
    timezone: Tz,
}

impl NotificationDispatcher {
    pub fn new(
        tokens: TokenService,
        notifier: Arc<dyn Notifier>,
        public_base_url: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self { tokens, notifier, public_base_url, timezone }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Issues a fresh token for `stage` and sends the approval link to `approver`.
    pub async fn notify(
        &self,
        booking: &Booking,
        stage: Stage,
        approver: &ApproverRef,
        now: DateTime<Utc>,
    ) -> Result<DispatchReceipt, DispatchError> {
        let phone = approver
            .contact
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .ok_or(DispatchError::MissingContact { stage })?;

        let issued = self
            .tokens
            .issue(&booking.id, booking.kind(), stage, Some(approver.clone()), now)
            .await?;
        let link = self.approval_link(booking.kind(), &booking.id, stage, &issued.secret);
        let message = self.compose_message(booking, stage, approver, &link);

        self.notifier.send(phone, &message).await?;

        tracing::info!(
            event_name = "approval.notify.sent",
            booking_id = %booking.id,
            resource_kind = booking.kind().as_str(),
            stage = %stage,
            approver_uid = %approver.uid.0,
            "approval request sent"
        );
        Ok(DispatchReceipt { issued, link })
    }

    pub fn approval_link(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        stage: Stage,
        secret: &str,
    ) -> String {
        format!(
            "{}/approval/{}/confirm?bookingId={}&token={}&stage={}",
            self.public_base_url,
            kind.as_str(),
            booking_id,
            secret,
            stage.index()
        )
    }

    pub fn compose_message(
        &self,
        booking: &Booking,
        stage: Stage,
        approver: &ApproverRef,
        link: &str,
    ) -> String {
        let noun = booking.kind().noun();
        let mut lines = vec![
            format!("Halo {},", approver.name),
            String::new(),
            format!(
                "*Permintaan Persetujuan Peminjaman {noun}* (Tahap {}: {})",
                stage.index(),
                stage_title(stage)
            ),
            format!("Kegiatan: {}", booking.details.activity),
            format!("{noun}: {}", booking.resource.name),
            format!("Pemohon: {} ({})", booking.requester.name, booking.requester.division),
        ];
        if let Some(count) = booking.details.participant_count {
            lines.push(format!("Peserta: {count} orang"));
        }
        if let Some(destination) = booking.details.destination.as_deref() {
            lines.push(format!("Tujuan: {destination}"));
        }
        lines.push(format!("Waktu: {}", booking.interval.display_in(self.timezone)));
        lines.push(String::new());
        lines.push(format!(
            "Setujui atau tolak melalui tautan berikut (berlaku {} jam):",
            self.tokens.ttl().num_hours()
        ));
        lines.push(link.to_string());
        lines.join("\n")
    }
}

pub fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Manager => "Manajer",
        Stage::Operator => "Operator",
        Stage::Admin => "Admin",
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub phone: String,
    pub message: String,
}

/// Notifier that keeps every message in memory. Can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("recording notifier set to fail".to_string()));
        }
        let entry = SentMessage { phone: phone.to_string(), message: message.to_string() };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::{DispatchError, NotificationDispatcher, RecordingNotifier};
    use crate::domain::booking::{
        Booking, BookingDetails, BookingDraft, BookingId, RequesterSnapshot, ResourceKind,
        ResourceRef,
    };
    use crate::domain::time::Interval;
    use crate::domain::user::{ApproverRef, Role, UserId};
    use crate::tokens::TokenService;
    use crate::workflow::memory::InMemoryStore;
    use crate::workflow::stages::Stage;

    fn vehicle_booking() -> Booking {
        // 02:00-05:00 UTC is 09:00-12:00 in Jakarta
        let start = Utc.with_ymd_and_hms(2026, 10, 20, 2, 0, 0).single().expect("start");
        let end = Utc.with_ymd_and_hms(2026, 10, 20, 5, 0, 0).single().expect("end");
        Booking::new(
            BookingId("BK-9".to_string()),
            BookingDraft {
                resource: ResourceRef {
                    kind: ResourceKind::Vehicle,
                    id: "V1".to_string(),
                    name: "Innova B 1234 CD".to_string(),
                },
                interval: Interval::new(start, end).expect("interval"),
                details: BookingDetails {
                    activity: "Kunjungan klien".to_string(),
                    participant_count: Some(4),
                    destination: Some("Bandung".to_string()),
                },
            },
            RequesterSnapshot {
                uid: UserId("u-staff".to_string()),
                name: "Sari".to_string(),
                division: "Sales".to_string(),
                role: Role::Staff,
                job_title: "Staff".to_string(),
                phone: None,
            },
            Utc::now(),
        )
    }

    fn dispatcher(store: &InMemoryStore, notifier: &RecordingNotifier) -> NotificationDispatcher {
        NotificationDispatcher::new(
            TokenService::new(Arc::new(store.clone()), Duration::hours(24)),
            Arc::new(notifier.clone()),
            "https://sarpras.example.test/",
            chrono_tz::Asia::Jakarta,
        )
    }

    fn approver(contact: Option<&str>) -> ApproverRef {
        ApproverRef {
            uid: UserId("u-op".to_string()),
            name: "Ops".to_string(),
            contact: contact.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn message_includes_booking_facts_local_time_and_link() {
        let store = InMemoryStore::default();
        let notifier = RecordingNotifier::default();
        let dispatcher = dispatcher(&store, &notifier);
        let booking = vehicle_booking();

        let receipt = dispatcher
            .notify(&booking, Stage::Operator, &approver(Some("081234567890")), Utc::now())
            .await
            .expect("notify");

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].phone, "081234567890");
        let message = &sent[0].message;
        assert!(message.contains("Kunjungan klien"));
        assert!(message.contains("Sales"));
        assert!(message.contains("Peserta: 4 orang"));
        assert!(message.contains("Tujuan: Bandung"));
        assert!(message.contains("20-10-2026 09:00 - 12:00 WIB"));
        assert!(message.contains(&receipt.link));
        assert_eq!(
            receipt.link,
            format!(
                "https://sarpras.example.test/approval/vehicle/confirm\
                 ?bookingId=BK-9&token={}&stage=2",
                receipt.issued.secret
            )
        );
        assert_eq!(receipt.issued.token.stage, Stage::Operator);
    }

    #[tokio::test]
    async fn approver_without_contact_is_reported_before_issuing() {
        let store = InMemoryStore::default();
        let notifier = RecordingNotifier::default();
        let dispatcher = dispatcher(&store, &notifier);

        let result =
            dispatcher.notify(&vehicle_booking(), Stage::Admin, &approver(None), Utc::now()).await;

        assert!(matches!(result, Err(DispatchError::MissingContact { stage: Stage::Admin })));
        assert!(notifier.sent().is_empty());
        assert_eq!(store.token_count().await, 0);
    }

    #[tokio::test]
    async fn notifier_failure_surfaces_as_dispatch_error() {
        let store = InMemoryStore::default();
        let notifier = RecordingNotifier::failing();
        let dispatcher = dispatcher(&store, &notifier);

        let result = dispatcher
            .notify(&vehicle_booking(), Stage::Manager, &approver(Some("0812")), Utc::now())
            .await;

        assert!(matches!(result, Err(DispatchError::Notifier(_))));
    }
}
