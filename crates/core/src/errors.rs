use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::tokens::TokenError;
use crate::workflow::WorkflowError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("interval start {start} must be before end {end}")]
    InvalidInterval { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown resource type `{0}`")]
    UnknownResourceKind(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidInterval { .. } => {
                "Waktu mulai harus lebih awal dari waktu selesai".to_string()
            }
            Self::MissingField(field) => format!("Field {field} wajib diisi"),
            Self::UnknownResourceKind(kind) => format!("Jenis sumber daya `{kind}` tidak dikenal"),
            Self::InvariantViolation(_) => "Data tidak valid".to_string(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Message safe to show the caller; internal details never leak.
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn with_correlation_id(mut self, correlation_id: String) -> Self {
        match &mut self {
            Self::BadRequest { correlation_id: id, .. }
            | Self::Forbidden { correlation_id: id, .. }
            | Self::NotFound { correlation_id: id, .. }
            | Self::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        self
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError::from(self).with_correlation_id(correlation_id.into())
    }
}

impl DispatchError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError::from(self).with_correlation_id(correlation_id.into())
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let message = value.user_message();
        let correlation_id = "unassigned".to_owned();
        match value {
            WorkflowError::Token(TokenError::Store(_)) => {
                Self::Internal { message, correlation_id }
            }
            WorkflowError::Domain(_)
            | WorkflowError::MissingReason
            | WorkflowError::StaleState { .. }
            | WorkflowError::ScheduleConflict { .. }
            | WorkflowError::Token(_) => Self::BadRequest { message, correlation_id },
            WorkflowError::Forbidden { .. } => Self::Forbidden { message, correlation_id },
            WorkflowError::NotFound(_) | WorkflowError::UnknownUser(_) => {
                Self::NotFound { message, correlation_id }
            }
            WorkflowError::Store(_) => Self::Internal { message, correlation_id },
        }
    }
}

impl From<DispatchError> for InterfaceError {
    fn from(value: DispatchError) -> Self {
        let message = value.user_message();
        let correlation_id = "unassigned".to_owned();
        match value {
            DispatchError::BookingNotFound(_) => Self::NotFound { message, correlation_id },
            DispatchError::NotWaiting { .. } => Self::BadRequest { message, correlation_id },
            DispatchError::Token(TokenError::Store(_)) | DispatchError::Store(_) => {
                Self::Internal { message, correlation_id }
            }
            DispatchError::Token(_) => Self::BadRequest { message, correlation_id },
            // Recipient data and delivery problems are not fixable by the caller.
            DispatchError::NoApprover { .. }
            | DispatchError::MissingContact { .. }
            | DispatchError::Notifier(_) => Self::Internal { message, correlation_id },
        }
    }
}
