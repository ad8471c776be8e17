pub mod audit;
pub mod config;
pub mod conflict;
pub mod directory;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod projection;
pub mod tokens;
pub mod workflow;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome};
pub use directory::UserDirectory;
pub use dispatch::{
    DispatchError, NotificationDispatcher, NotificationReport, Notifier, NotifyError,
    RecordingNotifier,
};
pub use domain::booking::{
    Booking, BookingDetails, BookingDraft, BookingId, RequesterSnapshot, ResourceKind,
    ResourceRef, StageRecord, StageStatus,
};
pub use domain::time::{Interval, WireTimestamp};
pub use domain::token::{ApprovalToken, TokenId};
pub use domain::user::{ActorProfile, ApproverRef, Role, UserId, UserProfile};
pub use errors::{DomainError, InterfaceError};
pub use projection::{BookingSummary, Capabilities, UiBucket};
pub use tokens::{TokenError, TokenService, TokenStore};
pub use workflow::memory::InMemoryStore;
pub use workflow::stages::{BookingStatus, Stage};
pub use workflow::store::{StoreError, WorkflowStore, WorkflowTransaction};
pub use workflow::{ApprovalService, WorkflowError};
