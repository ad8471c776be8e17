//! Read-side views over bookings: UI buckets, summaries and actor capabilities.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::domain::booking::{Booking, StageStatus};
use crate::domain::time::WireTimestamp;
use crate::domain::user::ActorProfile;
use crate::workflow::stages::{BookingStatus, Stage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiBucket {
    WaitingApproval,
    OnGoing,
    Done,
    Rejected,
}

impl UiBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingApproval => "WAITING_APPROVAL",
            Self::OnGoing => "ON_GOING",
            Self::Done => "DONE",
            Self::Rejected => "REJECTED",
        }
    }
}

pub fn bucket(status: BookingStatus) -> UiBucket {
    match status {
        BookingStatus::Submitted | BookingStatus::Waiting(_) => UiBucket::WaitingApproval,
        BookingStatus::Approved | BookingStatus::Ongoing => UiBucket::OnGoing,
        BookingStatus::Done => UiBucket::Done,
        BookingStatus::Rejected => UiBucket::Rejected,
    }
}

/// Like [`bucket`], but an approved or ongoing booking whose window has passed reads as done.
pub fn bucket_at(booking: &Booking, now: DateTime<Utc>) -> UiBucket {
    match bucket(booking.status) {
        UiBucket::OnGoing if booking.interval.has_ended(now) => UiBucket::Done,
        other => other,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub stage: Option<Stage>,
    pub can_approve: bool,
    pub can_reject: bool,
}

/// What `actor` may do with `booking` right now.
pub fn capabilities(booking: &Booking, actor: &ActorProfile) -> Capabilities {
    let stage = booking.status.waiting_stage();
    let allowed = stage.is_some_and(|stage| stage.authorizes(actor, booking));
    Capabilities { stage, can_approve: allowed, can_reject: allowed }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageView {
    pub stage: Stage,
    pub status: StageStatus,
    pub approver_name: Option<String>,
    pub decided_at: Option<WireTimestamp>,
    pub note: Option<String>,
}

/// Booking fields shown on the confirmation page and in lists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: String,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub resource_name: String,
    pub activity: String,
    pub requester_name: String,
    pub requester_division: String,
    pub participant_count: Option<u32>,
    pub destination: Option<String>,
    pub start: WireTimestamp,
    pub end: WireTimestamp,
    pub schedule: String,
    pub status: &'static str,
    pub status_label: &'static str,
    pub bucket: UiBucket,
    pub stages: Vec<StageView>,
    pub rejection_note: Option<String>,
}

impl BookingSummary {
    pub fn from_booking(booking: &Booking, timezone: Tz, now: DateTime<Utc>) -> Self {
        Self {
            id: booking.id.0.clone(),
            resource_type: booking.kind().as_str(),
            resource_id: booking.resource.id.clone(),
            resource_name: booking.resource.name.clone(),
            activity: booking.details.activity.clone(),
            requester_name: booking.requester.name.clone(),
            requester_division: booking.requester.division.clone(),
            participant_count: booking.details.participant_count,
            destination: booking.details.destination.clone(),
            start: booking.interval.start().into(),
            end: booking.interval.end().into(),
            schedule: booking.interval.display_in(timezone),
            status: booking.status.as_str(),
            status_label: booking.status.label(booking.kind()),
            bucket: bucket_at(booking, now),
            stages: booking
                .approval
                .iter()
                .map(|record| StageView {
                    stage: record.stage,
                    status: record.status,
                    approver_name: record.approver.as_ref().map(|approver| approver.name.clone()),
                    decided_at: record.decided_at.map(WireTimestamp::from),
                    note: record.note.clone(),
                })
                .collect(),
            rejection_note: booking.rejection.as_ref().map(|rejection| rejection.note.clone()),
        }
    }
}
