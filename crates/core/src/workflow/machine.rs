//! The approval state machine.
//!
//! Every transition runs against a caller-supplied [`WorkflowTransaction`] and
//! an explicit actor. Nothing here commits: the caller decides whether the
//! staged changes (booking update, conflict losers, audit rows and possibly a
//! token consumption) become visible together.

use chrono::{DateTime, Utc};

use crate::audit::{
    AuditCategory, AuditEvent, AuditOutcome, BOOKING_AUTO_REJECTED, BOOKING_COMPLETED,
    BOOKING_REJECTED, BOOKING_STAGE_APPROVED, BOOKING_SUBMITTED, BOOKING_USAGE_STARTED,
    SYSTEM_ACTOR,
};
use crate::conflict;
use crate::domain::booking::{
    Booking, BookingDraft, BookingId, Rejection, RejectionReason, RequesterSnapshot,
    ResourceKind, StageStatus,
};
use crate::domain::user::{ActorProfile, ApproverRef, UserProfile};
use crate::workflow::stages::{BookingStatus, Stage};
use crate::workflow::store::WorkflowTransaction;
use crate::workflow::WorkflowError;

#[derive(Clone, Debug)]
pub struct TransitionContext {
    pub correlation_id: String,
    pub now: DateTime<Utc>,
}

impl TransitionContext {
    pub fn new(correlation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { correlation_id: correlation_id.into(), now }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { note: String },
}

/// A new booking plus the approvers resolved for it before the transaction began.
#[derive(Clone, Debug)]
pub struct Submission {
    pub booking_id: BookingId,
    pub draft: BookingDraft,
    pub requester: UserProfile,
    /// Divisional manager frozen into stage 1.
    pub manager_binding: Option<ApproverRef>,
    /// Approver of the stage the booking enters, when that is not stage 1.
    pub entry_approver: Option<ApproverRef>,
}

/// Identifies one decision at one stage of one booking.
#[derive(Clone, Copy, Debug)]
pub struct StageAction<'a> {
    pub kind: ResourceKind,
    pub booking_id: &'a BookingId,
    pub stage: Stage,
    pub actor: &'a ActorProfile,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NextApproval {
    pub stage: Stage,
    pub approver: Option<ApproverRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub booking: Booking,
    /// Competing bookings rejected in the same transaction.
    pub auto_rejected: Vec<BookingId>,
    /// Stage now awaiting a decision, if any.
    pub next: Option<NextApproval>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    /// Stage a new booking from `requester` starts waiting at; `None` means fully approved.
    pub fn entry_stage(requester: &UserProfile) -> Option<Stage> {
        match Stage::auto_approved_through(requester) {
            None => Some(Stage::first()),
            Some(last) => last.next(),
        }
    }

    pub async fn submit(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        submission: Submission,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        submission.draft.validate()?;
        let Submission { booking_id, draft, requester, manager_binding, entry_approver } =
            submission;
        let now = ctx.now;

        let mut booking =
            Booking::new(booking_id, draft, RequesterSnapshot::from(&requester), now);
        if let Some(record) = booking.stage_record_mut(Stage::Manager) {
            record.approver = manager_binding;
        }

        let auto_through = Stage::auto_approved_through(&requester);
        if let Some(last) = auto_through {
            for record in booking.approval.iter_mut().filter(|record| record.stage <= last) {
                record.status = StageStatus::AutoApproved;
                record.decided_at = Some(now);
                record.approver = Some(requester.approver_ref());
            }
        }

        let entry = Self::entry_stage(&requester);
        booking.status = entry.map_or(BookingStatus::Approved, BookingStatus::Waiting);

        let next = entry.map(|stage| {
            if let Some(record) = booking.stage_record_mut(stage) {
                if entry_approver.is_some() {
                    record.approver = entry_approver.clone();
                }
            }
            NextApproval {
                stage,
                approver: booking.stage_record(stage).and_then(|record| record.approver.clone()),
            }
        });

        let losers = if booking.status.is_locked() {
            self.claim_resource(tx, &booking).await?
        } else {
            Vec::new()
        };

        tx.insert_booking(&booking).await?;
        let mut event = audit_event(
            ctx,
            &booking.id,
            BOOKING_SUBMITTED,
            AuditCategory::Submission,
            &requester.id.0,
            AuditOutcome::Success,
        )
        .with_metadata("status", booking.status.as_str())
        .with_metadata("resource_id", booking.resource.id.clone());
        if let Some(last) = auto_through {
            event = event.with_metadata("auto_approved_through", last.name());
        }
        tx.append_audit(&event).await?;

        let auto_rejected = self.reject_losers(tx, ctx, &booking, losers).await?;

        tracing::info!(
            event_name = "approval.booking.submitted",
            correlation_id = %ctx.correlation_id,
            booking_id = %booking.id,
            resource_kind = booking.kind().as_str(),
            status = booking.status.as_str(),
            "booking submitted"
        );
        Ok(ApprovalOutcome { booking, auto_rejected, next })
    }

    pub async fn approve(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        action: StageAction<'_>,
        next_approver: Option<ApproverRef>,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let mut booking = self.load_for_stage(tx, &action).await?;
        let expected = booking.status;
        let now = ctx.now;

        if let Some(record) = booking.stage_record_mut(action.stage) {
            record.status = StageStatus::Approved;
            record.decided_at = Some(now);
            record.approver = Some(action.actor.approver_ref());
        }
        booking.status =
            action.stage.next().map_or(BookingStatus::Approved, BookingStatus::Waiting);
        booking.updated_at = now;

        let next = action.stage.next().map(|next_stage| {
            if let Some(record) = booking.stage_record_mut(next_stage) {
                if next_approver.is_some() {
                    record.approver = next_approver.clone();
                }
            }
            NextApproval {
                stage: next_stage,
                approver: booking
                    .stage_record(next_stage)
                    .and_then(|record| record.approver.clone()),
            }
        });

        let losers = if booking.status.is_locked() && !expected.is_locked() {
            self.claim_resource(tx, &booking).await?
        } else {
            Vec::new()
        };

        self.write(tx, &booking, expected).await?;
        tx.append_audit(
            &audit_event(
                ctx,
                &booking.id,
                BOOKING_STAGE_APPROVED,
                AuditCategory::Approval,
                &action.actor.id.0,
                AuditOutcome::Success,
            )
            .with_metadata("stage", action.stage.name())
            .with_metadata("from", expected.as_str())
            .with_metadata("to", booking.status.as_str()),
        )
        .await?;

        let auto_rejected = self.reject_losers(tx, ctx, &booking, losers).await?;

        tracing::info!(
            event_name = "approval.booking.approved",
            correlation_id = %ctx.correlation_id,
            booking_id = %booking.id,
            resource_kind = booking.kind().as_str(),
            stage = %action.stage,
            status = booking.status.as_str(),
            auto_rejected = auto_rejected.len(),
            "stage approved"
        );
        Ok(ApprovalOutcome { booking, auto_rejected, next })
    }

    pub async fn reject(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        action: StageAction<'_>,
        note: &str,
    ) -> Result<ApprovalOutcome, WorkflowError> {
        let note = note.trim();
        if note.is_empty() {
            return Err(WorkflowError::MissingReason);
        }

        let mut booking = self.load_for_stage(tx, &action).await?;
        let expected = booking.status;
        booking.apply_rejection(
            action.stage,
            Some(action.actor.approver_ref()),
            Rejection {
                by: action.actor.name.clone(),
                note: note.to_string(),
                reason: RejectionReason::Manual,
            },
            ctx.now,
        );

        self.write(tx, &booking, expected).await?;
        tx.append_audit(
            &audit_event(
                ctx,
                &booking.id,
                BOOKING_REJECTED,
                AuditCategory::Approval,
                &action.actor.id.0,
                AuditOutcome::Rejected,
            )
            .with_metadata("stage", action.stage.name())
            .with_metadata("reason", RejectionReason::Manual.as_str()),
        )
        .await?;

        tracing::info!(
            event_name = "approval.booking.rejected",
            correlation_id = %ctx.correlation_id,
            booking_id = %booking.id,
            resource_kind = booking.kind().as_str(),
            stage = %action.stage,
            "booking rejected"
        );
        Ok(ApprovalOutcome { booking, auto_rejected: Vec::new(), next: None })
    }

    /// `APPROVED -> ONGOING`.
    pub async fn start_usage(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        kind: ResourceKind,
        booking_id: &BookingId,
        actor: &ActorProfile,
    ) -> Result<Booking, WorkflowError> {
        self.usage_transition(
            tx,
            ctx,
            (kind, booking_id, actor),
            (BookingStatus::Approved, BookingStatus::Ongoing),
            BOOKING_USAGE_STARTED,
        )
        .await
    }

    /// `ONGOING -> DONE`.
    pub async fn complete(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        kind: ResourceKind,
        booking_id: &BookingId,
        actor: &ActorProfile,
    ) -> Result<Booking, WorkflowError> {
        self.usage_transition(
            tx,
            ctx,
            (kind, booking_id, actor),
            (BookingStatus::Ongoing, BookingStatus::Done),
            BOOKING_COMPLETED,
        )
        .await
    }

    async fn usage_transition(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        (kind, booking_id, actor): (ResourceKind, &BookingId, &ActorProfile),
        (from, to): (BookingStatus, BookingStatus),
        event_type: &str,
    ) -> Result<Booking, WorkflowError> {
        let mut booking = load_of_kind(tx, kind, booking_id).await?;
        if booking.status != from {
            return Err(WorkflowError::StaleState {
                booking_id: booking.id,
                expected: from,
                actual: booking.status,
            });
        }

        booking.status = to;
        booking.updated_at = ctx.now;
        self.write(tx, &booking, from).await?;
        tx.append_audit(
            &audit_event(
                ctx,
                &booking.id,
                event_type,
                AuditCategory::Usage,
                &actor.id.0,
                AuditOutcome::Success,
            )
            .with_metadata("from", from.as_str())
            .with_metadata("to", to.as_str()),
        )
        .await?;

        tracing::info!(
            event_name = event_type,
            correlation_id = %ctx.correlation_id,
            booking_id = %booking.id,
            status = to.as_str(),
            "usage transition applied"
        );
        Ok(booking)
    }

    async fn load_for_stage(
        &self,
        tx: &mut dyn WorkflowTransaction,
        action: &StageAction<'_>,
    ) -> Result<Booking, WorkflowError> {
        let booking = load_of_kind(tx, action.kind, action.booking_id).await?;

        let expected = BookingStatus::Waiting(action.stage);
        if booking.status != expected {
            return Err(WorkflowError::StaleState {
                booking_id: booking.id,
                expected,
                actual: booking.status,
            });
        }

        if !action.stage.authorizes(action.actor, &booking) {
            return Err(WorkflowError::Forbidden {
                actor: action.actor.id.clone(),
                stage: action.stage,
            });
        }

        Ok(booking)
    }

    /// Checks the resource before `booking` becomes exclusive and returns the
    /// competitors that must lose.
    async fn claim_resource(
        &self,
        tx: &mut dyn WorkflowTransaction,
        booking: &Booking,
    ) -> Result<Vec<Booking>, WorkflowError> {
        let candidates =
            tx.live_bookings_for_resource(booking.kind(), &booking.resource.id).await?;
        let scan = conflict::scan(&booking.resource, &booking.interval, &candidates, &booking.id);

        if scan.is_blocked() {
            tracing::warn!(
                event_name = "approval.booking.conflict",
                booking_id = %booking.id,
                resource_id = %booking.resource.id,
                locked = scan.locked.len(),
                "resource already locked for an overlapping interval"
            );
            return Err(WorkflowError::ScheduleConflict {
                booking_id: booking.id.clone(),
                conflicting: scan.locked,
            });
        }

        Ok(candidates
            .into_iter()
            .filter(|candidate| scan.competitors.contains(&candidate.id))
            .collect())
    }

    async fn reject_losers(
        &self,
        tx: &mut dyn WorkflowTransaction,
        ctx: &TransitionContext,
        winner: &Booking,
        losers: Vec<Booking>,
    ) -> Result<Vec<BookingId>, WorkflowError> {
        let mut rejected = Vec::with_capacity(losers.len());

        for mut loser in losers {
            let expected = loser.status;
            let Some(stage) = expected.waiting_stage() else {
                continue;
            };

            loser.apply_rejection(
                stage,
                None,
                Rejection {
                    by: SYSTEM_ACTOR.to_string(),
                    note: format!("Otomatis ditolak: jadwal bentrok dengan booking {}", winner.id),
                    reason: RejectionReason::AutoRejectedConflict,
                },
                ctx.now,
            );
            self.write(tx, &loser, expected).await?;
            tx.append_audit(
                &audit_event(
                    ctx,
                    &loser.id,
                    BOOKING_AUTO_REJECTED,
                    AuditCategory::Conflict,
                    SYSTEM_ACTOR,
                    AuditOutcome::Rejected,
                )
                .with_metadata("winner", winner.id.0.clone())
                .with_metadata("stage", stage.name())
                .with_metadata("reason", RejectionReason::AutoRejectedConflict.as_str()),
            )
            .await?;

            tracing::info!(
                event_name = "approval.booking.auto_rejected",
                correlation_id = %ctx.correlation_id,
                booking_id = %loser.id,
                winner_id = %winner.id,
                stage = %stage,
                "competing booking auto-rejected"
            );
            rejected.push(loser.id);
        }

        Ok(rejected)
    }

    async fn write(
        &self,
        tx: &mut dyn WorkflowTransaction,
        booking: &Booking,
        expected: BookingStatus,
    ) -> Result<(), WorkflowError> {
        if tx.update_booking(booking, expected).await? {
            return Ok(());
        }

        let actual = tx
            .load_booking(&booking.id)
            .await?
            .map(|current| current.status)
            .ok_or_else(|| WorkflowError::NotFound(booking.id.clone()))?;
        Err(WorkflowError::StaleState { booking_id: booking.id.clone(), expected, actual })
    }
}

async fn load_of_kind(
    tx: &mut dyn WorkflowTransaction,
    kind: ResourceKind,
    booking_id: &BookingId,
) -> Result<Booking, WorkflowError> {
    tx.load_booking(booking_id)
        .await?
        .filter(|booking| booking.kind() == kind)
        .ok_or_else(|| WorkflowError::NotFound(booking_id.clone()))
}

fn audit_event(
    ctx: &TransitionContext,
    booking_id: &BookingId,
    event_type: &str,
    category: AuditCategory,
    actor: &str,
    outcome: AuditOutcome,
) -> AuditEvent {
    AuditEvent::new(
        booking_id.clone(),
        ctx.correlation_id.clone(),
        event_type,
        category,
        actor,
        outcome,
        ctx.now,
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ApprovalStateMachine, StageAction, Submission, TransitionContext};
    use crate::audit::{BOOKING_AUTO_REJECTED, BOOKING_SUBMITTED};
    use crate::domain::booking::{
        BookingDetails, BookingDraft, BookingId, RejectionReason, ResourceKind, ResourceRef,
        StageStatus,
    };
    use crate::domain::time::Interval;
    use crate::domain::user::{Role, UserId, UserProfile};
    use crate::workflow::memory::InMemoryStore;
    use crate::workflow::stages::{BookingStatus, Stage};
    use crate::workflow::store::WorkflowStore;
    use crate::workflow::WorkflowError;

    fn user(id: &str, role: Role, job_title: &str, division: &str) -> UserProfile {
        UserProfile {
            id: UserId(id.to_string()),
            name: id.to_string(),
            division: division.to_string(),
            role,
            job_title: job_title.to_string(),
            phone: Some("081200000001".to_string()),
        }
    }

    fn draft(room: &str, start_hour: u32, end_hour: u32) -> BookingDraft {
        BookingDraft {
            resource: ResourceRef {
                kind: ResourceKind::Room,
                id: room.to_string(),
                name: room.to_string(),
            },
            interval: Interval::new(
                Utc.with_ymd_and_hms(2026, 10, 20, start_hour, 0, 0).single().expect("start"),
                Utc.with_ymd_and_hms(2026, 10, 20, end_hour, 0, 0).single().expect("end"),
            )
            .expect("interval"),
            details: BookingDetails { activity: "Rapat".to_string(), ..Default::default() },
        }
    }

    fn ctx() -> TransitionContext {
        TransitionContext::new("test", Utc::now())
    }

    async fn submit(
        store: &InMemoryStore,
        id: &str,
        requester: &UserProfile,
        draft: BookingDraft,
    ) -> Result<super::ApprovalOutcome, WorkflowError> {
        let machine = ApprovalStateMachine;
        let mut tx = store.begin().await.expect("begin");
        let outcome = machine
            .submit(
                tx.as_mut(),
                &ctx(),
                Submission {
                    booking_id: BookingId(id.to_string()),
                    draft,
                    requester: requester.clone(),
                    manager_binding: None,
                    entry_approver: None,
                },
            )
            .await?;
        tx.commit().await.expect("commit");
        Ok(outcome)
    }

    async fn approve(
        store: &InMemoryStore,
        id: &str,
        stage: Stage,
        actor: &UserProfile,
    ) -> Result<super::ApprovalOutcome, WorkflowError> {
        let machine = ApprovalStateMachine;
        let booking_id = BookingId(id.to_string());
        let mut tx = store.begin().await.expect("begin");
        let outcome = machine
            .approve(
                tx.as_mut(),
                &ctx(),
                StageAction { kind: ResourceKind::Room, booking_id: &booking_id, stage, actor },
                None,
            )
            .await?;
        tx.commit().await.expect("commit");
        Ok(outcome)
    }

    #[tokio::test]
    async fn staff_submission_waits_for_manager_and_audits() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");

        let outcome = submit(&store, "BK-1", &staff, draft("R1", 3, 4)).await.expect("submit");

        assert_eq!(outcome.booking.status, BookingStatus::Waiting(Stage::Manager));
        assert_eq!(outcome.next.map(|next| next.stage), Some(Stage::Manager));
        let events = store.audit_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BOOKING_SUBMITTED);
    }

    #[tokio::test]
    async fn admin_submission_is_fully_auto_approved() {
        let store = InMemoryStore::default();
        let admin = user("admin", Role::Admin, "Staff", "GA");

        let outcome = submit(&store, "BK-1", &admin, draft("R1", 3, 4)).await.expect("submit");

        assert_eq!(outcome.booking.status, BookingStatus::Approved);
        assert!(outcome.next.is_none());
        assert!(outcome
            .booking
            .approval
            .iter()
            .all(|record| record.status == StageStatus::AutoApproved));
    }

    #[tokio::test]
    async fn manager_submission_skips_manager_stage() {
        let store = InMemoryStore::default();
        let manager = user("mgr", Role::Staff, "Manager", "Finance");

        let outcome = submit(&store, "BK-1", &manager, draft("R1", 3, 4)).await.expect("submit");

        assert_eq!(outcome.booking.status, BookingStatus::Waiting(Stage::Operator));
        let manager_record = outcome.booking.stage_record(Stage::Manager).expect("record");
        assert_eq!(manager_record.status, StageStatus::AutoApproved);
        let operator_record = outcome.booking.stage_record(Stage::Operator).expect("record");
        assert_eq!(operator_record.status, StageStatus::Pending);
    }

    #[tokio::test]
    async fn empty_draft_activity_is_rejected_before_any_write() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");
        let mut bad = draft("R1", 3, 4);
        bad.details.activity = " ".to_string();

        let result = submit(&store, "BK-1", &staff, bad).await;

        assert!(matches!(result, Err(WorkflowError::Domain(_))));
        assert!(store.find_booking(&BookingId("BK-1".to_string())).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn wrong_division_manager_is_forbidden() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");
        let other_manager = user("mgr-legal", Role::Staff, "Manager", "Legal");
        submit(&store, "BK-1", &staff, draft("R1", 3, 4)).await.expect("submit");

        let result = approve(&store, "BK-1", Stage::Manager, &other_manager).await;

        assert!(matches!(result, Err(WorkflowError::Forbidden { stage: Stage::Manager, .. })));
    }

    #[tokio::test]
    async fn operator_cannot_act_at_admin_stage() {
        let store = InMemoryStore::default();
        let operator = user("op", Role::Operator, "Staff", "GA");
        submit(&store, "BK-1", &operator, draft("R1", 3, 4)).await.expect("submit");

        let result = approve(&store, "BK-1", Stage::Admin, &operator).await;

        assert!(matches!(result, Err(WorkflowError::Forbidden { stage: Stage::Admin, .. })));
    }

    #[tokio::test]
    async fn second_approval_at_same_stage_is_stale_and_changes_nothing() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");
        let manager = user("mgr", Role::Staff, "Manager", "Finance");
        submit(&store, "BK-1", &staff, draft("R1", 3, 4)).await.expect("submit");
        approve(&store, "BK-1", Stage::Manager, &manager).await.expect("first approval");
        let before = store.find_booking(&BookingId("BK-1".to_string())).await.expect("find");

        let result = approve(&store, "BK-1", Stage::Manager, &manager).await;

        assert!(matches!(
            result,
            Err(WorkflowError::StaleState {
                expected: BookingStatus::Waiting(Stage::Manager),
                actual: BookingStatus::Waiting(Stage::Operator),
                ..
            })
        ));
        let after = store.find_booking(&BookingId("BK-1".to_string())).await.expect("find");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reject_requires_note_and_cancels_later_stages() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");
        let manager = user("mgr", Role::Staff, "Manager", "Finance");
        submit(&store, "BK-1", &staff, draft("R1", 3, 4)).await.expect("submit");
        let booking_id = BookingId("BK-1".to_string());
        let machine = ApprovalStateMachine;
        let action = StageAction {
            kind: ResourceKind::Room,
            booking_id: &booking_id,
            stage: Stage::Manager,
            actor: &manager,
        };

        let mut tx = store.begin().await.expect("begin");
        let missing = machine.reject(tx.as_mut(), &ctx(), action, "   ").await;
        assert!(matches!(missing, Err(WorkflowError::MissingReason)));

        let outcome = machine
            .reject(tx.as_mut(), &ctx(), action, "Ruangan dipakai direksi")
            .await
            .expect("reject");
        tx.commit().await.expect("commit");

        let booking = outcome.booking;
        assert_eq!(booking.status, BookingStatus::Rejected);
        let rejection = booking.rejection.as_ref().expect("rejection");
        assert_eq!(rejection.reason, RejectionReason::Manual);
        assert_eq!(rejection.note, "Ruangan dipakai direksi");
        assert_eq!(
            booking.stage_record(Stage::Manager).map(|record| record.status),
            Some(StageStatus::Rejected)
        );
        assert_eq!(
            booking.stage_record(Stage::Operator).map(|record| record.status),
            Some(StageStatus::Cancelled)
        );
        assert_eq!(
            booking.stage_record(Stage::Admin).map(|record| record.status),
            Some(StageStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn operator_submission_claims_resource_and_rejects_waiting_competitors() {
        let store = InMemoryStore::default();
        let staff = user("staff", Role::Staff, "Staff", "Finance");
        let operator = user("op", Role::Operator, "Staff", "GA");
        submit(&store, "BK-EARLY", &staff, draft("R1", 3, 5)).await.expect("submit");

        let outcome = submit(&store, "BK-OP", &operator, draft("R1", 4, 6)).await.expect("submit");

        assert_eq!(outcome.booking.status, BookingStatus::Waiting(Stage::Admin));
        assert_eq!(outcome.auto_rejected, vec![BookingId("BK-EARLY".to_string())]);
        let loser = store
            .find_booking(&BookingId("BK-EARLY".to_string()))
            .await
            .expect("find")
            .expect("loser");
        assert_eq!(loser.status, BookingStatus::Rejected);
        assert_eq!(
            loser.rejection.map(|rejection| rejection.reason),
            Some(RejectionReason::AutoRejectedConflict)
        );
        let events = store.audit_events().await;
        assert!(events.iter().any(|event| event.event_type == BOOKING_AUTO_REJECTED
            && event.booking_id.0 == "BK-EARLY"));
    }

    #[tokio::test]
    async fn locked_overlap_blocks_with_schedule_conflict() {
        let store = InMemoryStore::default();
        let admin = user("admin", Role::Admin, "Staff", "GA");
        let operator = user("op", Role::Operator, "Staff", "GA");
        submit(&store, "BK-LOCKED", &admin, draft("R1", 3, 5)).await.expect("submit");

        let result = submit(&store, "BK-LATE", &operator, draft("R1", 4, 6)).await;

        assert!(matches!(
            result,
            Err(WorkflowError::ScheduleConflict { ref conflicting, .. })
                if conflicting == &vec![BookingId("BK-LOCKED".to_string())]
        ));
        assert!(store
            .find_booking(&BookingId("BK-LATE".to_string()))
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn operator_approval_over_locked_booking_conflicts_and_stays_waiting() {
        let store = InMemoryStore::default();
        let admin = user("admin", Role::Admin, "Staff", "GA");
        let manager = user("mgr", Role::Staff, "Manager", "Finance");
        let operator = user("op", Role::Operator, "Staff", "GA");
        submit(&store, "BK-LOCKED", &admin, draft("R1", 3, 5)).await.expect("submit");
        submit(&store, "BK-LATE", &manager, draft("R1", 4, 6)).await.expect("submit");
        let before = store.find_booking(&BookingId("BK-LATE".to_string())).await.expect("find");
        assert_eq!(
            before.as_ref().map(|booking| booking.status),
            Some(BookingStatus::Waiting(Stage::Operator))
        );

        let result = approve(&store, "BK-LATE", Stage::Operator, &operator).await;

        assert!(matches!(
            result,
            Err(WorkflowError::ScheduleConflict { ref booking_id, ref conflicting })
                if booking_id.0 == "BK-LATE"
                    && conflicting == &vec![BookingId("BK-LOCKED".to_string())]
        ));
        let after = store.find_booking(&BookingId("BK-LATE".to_string())).await.expect("find");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn usage_transitions_follow_approved_ongoing_done() {
        let store = InMemoryStore::default();
        let admin = user("admin", Role::Admin, "Staff", "GA");
        submit(&store, "BK-1", &admin, draft("R1", 3, 4)).await.expect("submit");
        let booking_id = BookingId("BK-1".to_string());
        let machine = ApprovalStateMachine;

        let mut tx = store.begin().await.expect("begin");
        let early =
            machine.complete(tx.as_mut(), &ctx(), ResourceKind::Room, &booking_id, &admin).await;
        assert!(matches!(early, Err(WorkflowError::StaleState { .. })));

        let started = machine
            .start_usage(tx.as_mut(), &ctx(), ResourceKind::Room, &booking_id, &admin)
            .await
            .expect("start");
        assert_eq!(started.status, BookingStatus::Ongoing);
        let done = machine
            .complete(tx.as_mut(), &ctx(), ResourceKind::Room, &booking_id, &admin)
            .await
            .expect("complete");
        assert_eq!(done.status, BookingStatus::Done);
        tx.commit().await.expect("commit");

        let mut tx = store.begin().await.expect("begin");
        let wrong_kind = machine
            .start_usage(tx.as_mut(), &ctx(), ResourceKind::Vehicle, &booking_id, &admin)
            .await;
        assert!(matches!(wrong_kind, Err(WorkflowError::NotFound(_))));
    }
}
