//! In-memory adapters for the storage, token and directory ports.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! staged copy, so concurrent transactions serialize and a dropped transaction
//! leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::audit::AuditEvent;
use crate::directory::UserDirectory;
use crate::domain::booking::{Booking, BookingId, ResourceKind};
use crate::domain::token::{ApprovalToken, TokenId};
use crate::domain::user::{Role, UserId, UserProfile};
use crate::tokens::TokenStore;
use crate::workflow::stages::BookingStatus;
use crate::workflow::store::{StoreError, WorkflowStore, WorkflowTransaction};

#[derive(Clone, Debug, Default)]
struct StoreState {
    bookings: BTreeMap<BookingId, Booking>,
    tokens: Vec<ApprovalToken>,
    audit: Vec<AuditEvent>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    users: Arc<RwLock<Vec<UserProfile>>>,
}

impl InMemoryStore {
    /// Adds or replaces a directory entry. Insertion order is the directory order.
    pub async fn put_user(&self, profile: UserProfile) {
        let mut users = self.users.write().await;
        match users.iter_mut().find(|existing| existing.id == profile.id) {
            Some(existing) => *existing = profile,
            None => users.push(profile),
        }
    }

    /// Stores a booking as-is, bypassing the state machine.
    pub async fn put_booking(&self, booking: Booking) {
        self.state.lock().await.bookings.insert(booking.id.clone(), booking);
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().await.audit.clone()
    }

    pub async fn token_count(&self) -> usize {
        self.state.lock().await.tokens.len()
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

#[async_trait]
impl WorkflowTransaction for InMemoryTransaction {
    async fn load_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.staged.bookings.get(id).cloned())
    }

    async fn live_bookings_for_resource(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .staged
            .bookings
            .values()
            .filter(|booking| booking.resource.kind == kind && booking.resource.id == resource_id)
            .filter(|booking| booking.status.is_live())
            .cloned()
            .collect())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if self.staged.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate(booking.id.0.clone()));
        }
        self.staged.bookings.insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn update_booking(
        &mut self,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<bool, StoreError> {
        match self.staged.bookings.get_mut(&booking.id) {
            Some(current) if current.status == expected => {
                *current = booking.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_token(
        &mut self,
        id: &TokenId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.staged.tokens.iter_mut().find(|token| token.id == *id) {
            Some(token) if !token.used => {
                token.used = true;
                token.used_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_audit(&mut self, event: &AuditEvent) -> Result<(), StoreError> {
        self.staged.audit.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }

    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.lock().await.bookings.get(id).cloned())
    }

    async fn list_bookings(&self, kind: ResourceKind) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> =
            state.bookings.values().filter(|booking| booking.kind() == kind).cloned().collect();
        bookings.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(bookings)
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert_token(&self, token: &ApprovalToken) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.tokens.iter().any(|existing| existing.id == token.id) {
            return Err(StoreError::Duplicate(token.id.0.clone()));
        }
        state.tokens.push(token.clone());
        Ok(())
    }

    async fn find_token(
        &self,
        booking_id: &BookingId,
        secret_digest: &str,
    ) -> Result<Option<ApprovalToken>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .iter()
            .find(|token| token.booking_id == *booking_id && token.secret_digest == secret_digest)
            .cloned())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.read().await.iter().find(|user| user.id == *id).cloned())
    }

    async fn first_with_role(&self, role: Role) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.read().await.iter().find(|user| user.role == role).cloned())
    }

    async fn division_manager(&self, division: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|user| user.is_manager() && user.same_division(division))
            .cloned())
    }
}
