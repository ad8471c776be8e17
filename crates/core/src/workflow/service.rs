//! Request-level orchestration around the state machine.
//!
//! Ordering matters here: directory lookups and token verification run before
//! the transaction opens, notifications run after it commits. A transaction is
//! never held across calls to the other ports.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::config::{ApprovalConfig, ConfigError};
use crate::directory::{resolve_approver, UserDirectory};
use crate::dispatch::{
    DispatchError, DispatchReceipt, NotificationDispatcher, NotificationReport, Notifier,
};
use crate::domain::booking::{Booking, BookingDraft, BookingId, ResourceKind};
use crate::domain::token::ApprovalToken;
use crate::domain::user::{ApproverRef, UserId, UserProfile};
use crate::errors::DomainError;
use crate::projection::{self, Capabilities};
use crate::tokens::{TokenError, TokenService, TokenStore};
use crate::workflow::machine::{
    ApprovalOutcome, ApprovalStateMachine, Decision, StageAction, Submission, TransitionContext,
};
use crate::workflow::stages::{BookingStatus, Stage, StageAuthority};
use crate::workflow::store::WorkflowStore;
use crate::workflow::WorkflowError;

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub requester_uid: UserId,
    pub draft: BookingDraft,
}

#[derive(Clone, Debug)]
pub struct DecisionRequest {
    pub actor_uid: UserId,
    pub stage: Stage,
    pub decision: Decision,
}

/// Action requested through an approval link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkAction {
    Approve,
    Reject,
}

impl std::str::FromStr for LinkAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APPROVE" => Ok(Self::Approve),
            "REJECT" => Ok(Self::Reject),
            other => Err(DomainError::InvariantViolation(format!("unknown action `{other}`"))),
        }
    }
}

/// A committed transition plus what happened to its follow-up notification.
#[derive(Clone, Debug)]
pub struct ServiceOutcome {
    pub outcome: ApprovalOutcome,
    pub notification: NotificationReport,
}

#[derive(Clone, Debug)]
pub struct VerifiedLink {
    pub booking: Booking,
    pub token: ApprovalToken,
}

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn WorkflowStore>,
    directory: Arc<dyn UserDirectory>,
    dispatcher: NotificationDispatcher,
    machine: ApprovalStateMachine,
    timezone: Tz,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        directory: Arc<dyn UserDirectory>,
        dispatcher: NotificationDispatcher,
        timezone: Tz,
    ) -> Self {
        Self { store, directory, dispatcher, machine: ApprovalStateMachine, timezone }
    }

    pub fn from_config(
        store: Arc<dyn WorkflowStore>,
        directory: Arc<dyn UserDirectory>,
        token_store: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
        config: &ApprovalConfig,
    ) -> Result<Self, ConfigError> {
        let timezone = config.timezone()?;
        let tokens = TokenService::new(token_store, config.token_ttl());
        let dispatcher =
            NotificationDispatcher::new(tokens, notifier, config.public_base_url.clone(), timezone);
        Ok(Self::new(store, directory, dispatcher, timezone))
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn tokens(&self) -> &TokenService {
        self.dispatcher.tokens()
    }

    pub async fn submit(
        &self,
        request: SubmitRequest,
        correlation_id: &str,
    ) -> Result<ServiceOutcome, WorkflowError> {
        request.draft.validate()?;
        let requester = self.require_user(&request.requester_uid).await?;

        let manager_binding = self
            .directory
            .division_manager(&requester.division)
            .await?
            .map(|manager| manager.approver_ref());
        let entry_approver =
            match ApprovalStateMachine::entry_stage(&requester).map(Stage::authority) {
                Some(StageAuthority::Role(role)) => {
                    self.directory.first_with_role(role).await?.map(|user| user.approver_ref())
                }
                _ => None,
            };

        let ctx = TransitionContext::new(correlation_id, Utc::now());
        let mut tx = self.store.begin().await?;
        let outcome = self
            .machine
            .submit(
                tx.as_mut(),
                &ctx,
                Submission {
                    booking_id: BookingId::generate(),
                    draft: request.draft,
                    requester,
                    manager_binding,
                    entry_approver,
                },
            )
            .await?;
        tx.commit().await?;

        let notification = self.notify_next(&outcome, &ctx).await;
        Ok(ServiceOutcome { outcome, notification })
    }

    /// In-app approve or reject by an identified actor.
    pub async fn decide(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        request: DecisionRequest,
        correlation_id: &str,
    ) -> Result<ServiceOutcome, WorkflowError> {
        if let Decision::Reject { note } = &request.decision {
            if note.trim().is_empty() {
                return Err(WorkflowError::MissingReason);
            }
        }

        let actor = self.require_user(&request.actor_uid).await?;
        let action = StageAction { kind, booking_id, stage: request.stage, actor: &actor };
        let next_approver = match request.decision {
            Decision::Approve => self.next_approver(kind, booking_id, request.stage).await?,
            Decision::Reject { .. } => None,
        };

        let ctx = TransitionContext::new(correlation_id, Utc::now());
        let mut tx = self.store.begin().await?;
        let outcome = match &request.decision {
            Decision::Approve => {
                self.machine.approve(tx.as_mut(), &ctx, action, next_approver).await?
            }
            Decision::Reject { note } => {
                self.machine.reject(tx.as_mut(), &ctx, action, note).await?
            }
        };
        tx.commit().await?;

        let notification = self.notify_next(&outcome, &ctx).await;
        Ok(ServiceOutcome { outcome, notification })
    }

    /// Resolves the stage approver, issues a token and sends the link.
    pub async fn send_link(
        &self,
        kind: ResourceKind,
        stage: Stage,
        booking_id: &BookingId,
        correlation_id: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .filter(|booking| booking.kind() == kind)
            .ok_or_else(|| DispatchError::BookingNotFound(booking_id.clone()))?;

        if booking.status != BookingStatus::Waiting(stage) {
            return Err(DispatchError::NotWaiting {
                booking_id: booking.id,
                stage,
                actual: booking.status,
            });
        }

        let approver = resolve_approver(self.directory.as_ref(), &booking, stage)
            .await?
            .ok_or(DispatchError::NoApprover { stage })?;

        match self.dispatcher.notify(&booking, stage, &approver, Utc::now()).await {
            Ok(receipt) => Ok(receipt),
            Err(error) => {
                tracing::warn!(
                    event_name = "approval.notify.failed",
                    correlation_id,
                    booking_id = %booking.id,
                    stage = %stage,
                    error = %error,
                    "approval link could not be sent"
                );
                Err(error)
            }
        }
    }

    /// Read-only check of a link; safe to repeat.
    pub async fn verify(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        secret: &str,
    ) -> Result<VerifiedLink, WorkflowError> {
        let token = self.tokens().verify(booking_id, secret, Utc::now()).await?;
        if token.resource_kind != kind {
            return Err(TokenError::NotFound.into());
        }
        let booking = self
            .store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(booking_id.clone()))?;
        Ok(VerifiedLink { booking, token })
    }

    /// Performs the linked decision as the token's approver at the token's stage
    /// and consumes the token in the same transaction.
    pub async fn act(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        secret: &str,
        action: LinkAction,
        note: Option<&str>,
        correlation_id: &str,
    ) -> Result<ServiceOutcome, WorkflowError> {
        let note = note.map(str::trim).unwrap_or_default();
        if action == LinkAction::Reject && note.is_empty() {
            return Err(WorkflowError::MissingReason);
        }

        let VerifiedLink { token, .. } = self.verify(kind, booking_id, secret).await?;
        let approver_uid = token
            .approver
            .as_ref()
            .map(|approver| approver.uid.clone())
            .ok_or(WorkflowError::Token(TokenError::NotFound))?;
        let actor = self.require_user(&approver_uid).await?;
        let stage_action = StageAction { kind, booking_id, stage: token.stage, actor: &actor };
        let next_approver = match action {
            LinkAction::Approve => self.next_approver(kind, booking_id, token.stage).await?,
            LinkAction::Reject => None,
        };

        let ctx = TransitionContext::new(correlation_id, Utc::now());
        let mut tx = self.store.begin().await?;
        let outcome = match action {
            LinkAction::Approve => {
                self.machine.approve(tx.as_mut(), &ctx, stage_action, next_approver).await?
            }
            LinkAction::Reject => self.machine.reject(tx.as_mut(), &ctx, stage_action, note).await?,
        };
        self.tokens().consume(tx.as_mut(), &token, ctx.now).await?;
        tx.commit().await?;

        tracing::info!(
            event_name = "approval.token.consumed",
            correlation_id,
            booking_id = %booking_id,
            stage = %token.stage,
            token_id = %token.id.0,
            "approval link used"
        );

        let notification = self.notify_next(&outcome, &ctx).await;
        Ok(ServiceOutcome { outcome, notification })
    }

    pub async fn start_usage(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        actor_uid: &UserId,
        correlation_id: &str,
    ) -> Result<Booking, WorkflowError> {
        let actor = self.require_user(actor_uid).await?;
        let ctx = TransitionContext::new(correlation_id, Utc::now());
        let mut tx = self.store.begin().await?;
        let booking = self.machine.start_usage(tx.as_mut(), &ctx, kind, booking_id, &actor).await?;
        tx.commit().await?;
        Ok(booking)
    }

    pub async fn complete(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        actor_uid: &UserId,
        correlation_id: &str,
    ) -> Result<Booking, WorkflowError> {
        let actor = self.require_user(actor_uid).await?;
        let ctx = TransitionContext::new(correlation_id, Utc::now());
        let mut tx = self.store.begin().await?;
        let booking = self.machine.complete(tx.as_mut(), &ctx, kind, booking_id, &actor).await?;
        tx.commit().await?;
        Ok(booking)
    }

    pub async fn get(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
    ) -> Result<Booking, WorkflowError> {
        self.store
            .find_booking(booking_id)
            .await?
            .filter(|booking| booking.kind() == kind)
            .ok_or_else(|| WorkflowError::NotFound(booking_id.clone()))
    }

    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<Booking>, WorkflowError> {
        Ok(self.store.list_bookings(kind).await?)
    }

    pub async fn capabilities(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        actor_uid: &UserId,
    ) -> Result<Capabilities, WorkflowError> {
        let booking = self.get(kind, booking_id).await?;
        let actor = self.require_user(actor_uid).await?;
        Ok(projection::capabilities(&booking, &actor))
    }

    async fn require_user(&self, uid: &UserId) -> Result<UserProfile, WorkflowError> {
        self.directory
            .find_user(uid)
            .await?
            .ok_or_else(|| WorkflowError::UnknownUser(uid.clone()))
    }

    /// Approver for the stage after `stage`, from a snapshot read outside the
    /// transaction. The machine re-validates the booking itself.
    async fn next_approver(
        &self,
        kind: ResourceKind,
        booking_id: &BookingId,
        stage: Stage,
    ) -> Result<Option<ApproverRef>, WorkflowError> {
        let Some(next_stage) = stage.next() else {
            return Ok(None);
        };
        let snapshot =
            self.store.find_booking(booking_id).await?.filter(|booking| booking.kind() == kind);
        match snapshot {
            Some(booking) => {
                Ok(resolve_approver(self.directory.as_ref(), &booking, next_stage).await?)
            }
            None => Ok(None),
        }
    }

    async fn notify_next(
        &self,
        outcome: &ApprovalOutcome,
        ctx: &TransitionContext,
    ) -> NotificationReport {
        let Some(next) = &outcome.next else {
            return NotificationReport::NotRequired;
        };
        let Some(approver) = &next.approver else {
            tracing::warn!(
                event_name = "approval.notify.unresolved",
                correlation_id = %ctx.correlation_id,
                booking_id = %outcome.booking.id,
                stage = %next.stage,
                "no approver could be resolved for the next stage"
            );
            return NotificationReport::Unresolved { stage: next.stage };
        };

        match self.dispatcher.notify(&outcome.booking, next.stage, approver, ctx.now).await {
            Ok(_) => NotificationReport::Sent { stage: next.stage, approver: approver.clone() },
            Err(error) => {
                tracing::warn!(
                    event_name = "approval.notify.failed",
                    correlation_id = %ctx.correlation_id,
                    booking_id = %outcome.booking.id,
                    stage = %next.stage,
                    error = %error,
                    "notification failed after commit"
                );
                NotificationReport::Failed { stage: next.stage, reason: error.to_string() }
            }
        }
    }
}
