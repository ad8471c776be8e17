//! Storage ports used by the state machine.
//!
//! A [`WorkflowTransaction`] is the atomic unit: everything read and written
//! through it commits together or not at all. Dropping it without calling
//! [`WorkflowTransaction::commit`] discards every staged change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::domain::booking::{Booking, BookingId, ResourceKind};
use crate::domain::token::TokenId;
use crate::workflow::stages::BookingStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("record `{0}` already exists")]
    Duplicate(String),
}

#[async_trait]
pub trait WorkflowTransaction: Send {
    async fn load_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, StoreError>;

    /// Bookings on the same resource whose status is live (waiting, approved, ongoing).
    async fn live_bookings_for_resource(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Compare-and-swap on `status`. Returns `false` when the stored status no
    /// longer equals `expected`.
    async fn update_booking(
        &mut self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<bool, StoreError>;

    /// Marks a token used. Returns `false` when it was already used.
    async fn consume_token(&mut self, id: &TokenId, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    async fn append_audit(&mut self, event: &AuditEvent) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError>;

    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError>;

    async fn list_bookings(&self, kind: ResourceKind) -> Result<Vec<Booking>, StoreError>;
}
