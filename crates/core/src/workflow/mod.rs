//! Booking approval workflow: the stage pipeline, the transition machine and
//! the service that wires it to storage, tokens and notifications.

pub mod machine;
pub mod memory;
pub mod service;
pub mod stages;
pub mod store;

use thiserror::Error;

use crate::domain::booking::BookingId;
use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::tokens::TokenError;
use stages::{BookingStatus, Stage};
use store::StoreError;

pub use machine::{ApprovalOutcome, ApprovalStateMachine, Decision, NextApproval};
pub use service::{ApprovalService, DecisionRequest, LinkAction, SubmitRequest};
pub use stages::StageAuthority;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("booking `{0}` not found")]
    NotFound(BookingId),
    #[error("user `{}` not found", .0 .0)]
    UnknownUser(UserId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("rejection requires a non-empty note")]
    MissingReason,
    #[error("booking `{booking_id}` is {actual}, expected {expected}")]
    StaleState { booking_id: BookingId, expected: BookingStatus, actual: BookingStatus },
    #[error("booking `{booking_id}` overlaps locked bookings {conflicting:?}")]
    ScheduleConflict { booking_id: BookingId, conflicting: Vec<BookingId> },
    #[error("user `{}` may not act at the {stage} stage", actor.0)]
    Forbidden { actor: UserId, stage: Stage },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(_) => "Booking tidak ditemukan".to_string(),
            Self::UnknownUser(_) => "Pengguna tidak ditemukan".to_string(),
            Self::Domain(error) => error.user_message(),
            Self::MissingReason => "Alasan penolakan wajib diisi".to_string(),
            Self::StaleState { .. } => {
                "Status booking sudah berubah, silakan muat ulang".to_string()
            }
            Self::ScheduleConflict { .. } => {
                "Jadwal bentrok dengan booking lain yang sudah dikunci".to_string()
            }
            Self::Forbidden { .. } => "Anda tidak berwenang menyetujui tahap ini".to_string(),
            Self::Token(error) => error.user_message(),
            Self::Store(_) => "Terjadi kesalahan internal".to_string(),
        }
    }
}
