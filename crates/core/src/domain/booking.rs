use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::time::Interval;
use crate::domain::user::{ApproverRef, Role, UserId, UserProfile};
use crate::errors::DomainError;
use crate::workflow::stages::{BookingStatus, Stage};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(format!("BK-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Room,
    Vehicle,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::Vehicle => "vehicle",
        }
    }

    /// Human label used in outbound messages.
    pub fn noun(&self) -> &'static str {
        match self {
            Self::Room => "Ruangan",
            Self::Vehicle => "Kendaraan",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "room" | "rooms" | "ruangan" => Ok(Self::Room),
            "vehicle" | "vehicles" | "kendaraan" => Ok(Self::Vehicle),
            other => Err(DomainError::UnknownResourceKind(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
}

/// Frozen copy of the requesting user at submission time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterSnapshot {
    pub uid: UserId,
    pub name: String,
    pub division: String,
    pub role: Role,
    pub job_title: String,
    pub phone: Option<String>,
}

impl From<&UserProfile> for RequesterSnapshot {
    fn from(profile: &UserProfile) -> Self {
        Self {
            uid: profile.id.clone(),
            name: profile.name.clone(),
            division: profile.division.clone(),
            role: profile.role,
            job_title: profile.job_title.clone(),
            phone: profile.phone.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub activity: String,
    pub participant_count: Option<u32>,
    pub destination: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    AutoApproved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub approver: Option<ApproverRef>,
    pub status: StageStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl StageRecord {
    pub fn pending(stage: Stage) -> Self {
        Self { stage, approver: None, status: StageStatus::Pending, decided_at: None, note: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    Manual,
    AutoRejectedConflict,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::AutoRejectedConflict => "AUTO_REJECTED_CONFLICT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub by: String,
    pub note: String,
    pub reason: RejectionReason,
}

/// What the submission flow hands to the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingDraft {
    pub resource: ResourceRef,
    pub interval: Interval,
    pub details: BookingDetails,
}

impl BookingDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.resource.id.trim().is_empty() {
            return Err(DomainError::MissingField("resourceId"));
        }
        if self.details.activity.trim().is_empty() {
            return Err(DomainError::MissingField("activity"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource: ResourceRef,
    pub interval: Interval,
    pub requester: RequesterSnapshot,
    pub details: BookingDetails,
    pub status: BookingStatus,
    pub approval: Vec<StageRecord>,
    pub rejection: Option<Rejection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        id: BookingId,
        draft: BookingDraft,
        requester: RequesterSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            resource: draft.resource,
            interval: draft.interval,
            requester,
            details: draft.details,
            status: BookingStatus::Submitted,
            approval: Stage::PIPELINE.into_iter().map(StageRecord::pending).collect(),
            rejection: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.resource.kind
    }

    pub fn stage_record(&self, stage: Stage) -> Option<&StageRecord> {
        self.approval.iter().find(|record| record.stage == stage)
    }

    pub fn stage_record_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.approval.iter_mut().find(|record| record.stage == stage)
    }

    /// Marks `stage` rejected, moots every later stage and terminalizes the booking.
    pub(crate) fn apply_rejection(
        &mut self,
        stage: Stage,
        decided_by: Option<ApproverRef>,
        rejection: Rejection,
        now: DateTime<Utc>,
    ) {
        for record in &mut self.approval {
            if record.stage == stage {
                record.status = StageStatus::Rejected;
                record.decided_at = Some(now);
                record.note = Some(rejection.note.clone());
                if decided_by.is_some() {
                    record.approver = decided_by.clone();
                }
            } else if record.stage > stage {
                record.status = StageStatus::Cancelled;
            }
        }
        self.status = BookingStatus::Rejected;
        self.rejection = Some(rejection);
        self.updated_at = now;
    }
}
