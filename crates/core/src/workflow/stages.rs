//! The fixed approval pipeline and the booking status enum.
//!
//! Rooms and vehicles share one pipeline; they differ only in display labels
//! (`WAITING_MANAGER` vs `APPROVAL_1`). Stored values are always the canonical
//! `WAITING_STAGE_n` spelling.

use serde::{Deserialize, Serialize};

use crate::domain::booking::{Booking, ResourceKind};
use crate::domain::user::{normalize_key, Role, UserProfile};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Manager,
    Operator,
    Admin,
}

/// Who is allowed to act at a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageAuthority {
    /// Job title manager, bound to the booking or sharing the requester's division.
    DivisionManager,
    Role(Role),
}

impl Stage {
    pub const PIPELINE: [Stage; 3] = [Stage::Manager, Stage::Operator, Stage::Admin];

    /// The stage at which a reservation becomes exclusive.
    pub const LOCKING: Stage = Stage::Operator;

    pub fn index(self) -> u8 {
        match self {
            Self::Manager => 1,
            Self::Operator => 2,
            Self::Admin => 3,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::PIPELINE.into_iter().find(|stage| stage.index() == index)
    }

    pub fn first() -> Self {
        Self::PIPELINE[0]
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn is_final(self) -> bool {
        self.next().is_none()
    }

    pub fn is_locking(self) -> bool {
        self == Self::LOCKING
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }

    pub fn authority(self) -> StageAuthority {
        match self {
            Self::Manager => StageAuthority::DivisionManager,
            Self::Operator => StageAuthority::Role(Role::Operator),
            Self::Admin => StageAuthority::Role(Role::Admin),
        }
    }

    /// Role/job-title predicate only, without the per-booking ownership check.
    pub fn admits(self, profile: &UserProfile) -> bool {
        match self.authority() {
            StageAuthority::DivisionManager => profile.is_manager(),
            StageAuthority::Role(role) => profile.role == role,
        }
    }

    /// Full check used before any transition at this stage.
    pub fn authorizes(self, actor: &UserProfile, booking: &Booking) -> bool {
        if !self.admits(actor) {
            return false;
        }

        match self.authority() {
            StageAuthority::DivisionManager => {
                let bound = booking
                    .stage_record(self)
                    .and_then(|record| record.approver.as_ref())
                    .is_some_and(|approver| approver.uid == actor.id);
                bound || actor.same_division(&booking.requester.division)
            }
            StageAuthority::Role(_) => true,
        }
    }

    pub fn label(self, kind: ResourceKind) -> &'static str {
        match (kind, self) {
            (ResourceKind::Room, Self::Manager) => "WAITING_MANAGER",
            (ResourceKind::Room, Self::Operator) => "WAITING_OPERATOR",
            (ResourceKind::Room, Self::Admin) => "WAITING_ADMIN",
            (ResourceKind::Vehicle, Self::Manager) => "APPROVAL_1",
            (ResourceKind::Vehicle, Self::Operator) => "APPROVAL_2",
            (ResourceKind::Vehicle, Self::Admin) => "APPROVAL_3",
        }
    }

    /// Highest stage the requester could approve themselves. Every stage up to
    /// and including it is auto-approved on submission.
    pub fn auto_approved_through(requester: &UserProfile) -> Option<Self> {
        Self::PIPELINE.into_iter().rev().find(|stage| stage.admits(requester))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stage {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = normalize_key(value);
        let parsed = match key.as_str() {
            "1" | "stage_1" | "manager" | "waiting_manager" | "approval_1" => Some(Self::Manager),
            "2" | "stage_2" | "operator" | "waiting_operator" | "approval_2" => {
                Some(Self::Operator)
            }
            "3" | "stage_3" | "admin" | "waiting_admin" | "approval_3" => Some(Self::Admin),
            _ => None,
        };
        parsed.ok_or_else(|| DomainError::InvariantViolation(format!("unknown stage `{value}`")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BookingStatus {
    Submitted,
    Waiting(Stage),
    Approved,
    Ongoing,
    Done,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Waiting(Stage::Manager) => "WAITING_STAGE_1",
            Self::Waiting(Stage::Operator) => "WAITING_STAGE_2",
            Self::Waiting(Stage::Admin) => "WAITING_STAGE_3",
            Self::Approved => "APPROVED",
            Self::Ongoing => "ONGOING",
            Self::Done => "DONE",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn label(&self, kind: ResourceKind) -> &'static str {
        match self {
            Self::Waiting(stage) => stage.label(kind),
            other => other.as_str(),
        }
    }

    pub fn waiting_stage(&self) -> Option<Stage> {
        match self {
            Self::Waiting(stage) => Some(*stage),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Rejected)
    }

    /// Statuses that still hold or compete for the resource.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Waiting(_) | Self::Approved | Self::Ongoing)
    }

    /// Past the locking stage: the reservation is exclusive.
    pub fn is_locked(&self) -> bool {
        match self {
            Self::Waiting(stage) => *stage > Stage::LOCKING,
            Self::Approved | Self::Ongoing => true,
            _ => false,
        }
    }

    pub fn live_values() -> Vec<BookingStatus> {
        let mut values: Vec<BookingStatus> =
            Stage::PIPELINE.into_iter().map(BookingStatus::Waiting).collect();
        values.extend([Self::Approved, Self::Ongoing]);
        values
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = value.trim().to_ascii_uppercase();
        match key.as_str() {
            "SUBMITTED" => Ok(Self::Submitted),
            "APPROVED" => Ok(Self::Approved),
            "ONGOING" | "ON_GOING" => Ok(Self::Ongoing),
            "DONE" => Ok(Self::Done),
            "REJECTED" => Ok(Self::Rejected),
            other => {
                let stage = other
                    .strip_prefix("WAITING_STAGE_")
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string())
                    .parse::<Stage>()
                    .map_err(|_| {
                        DomainError::InvariantViolation(format!("unknown booking status `{value}`"))
                    })?;
                Ok(Self::Waiting(stage))
            }
        }
    }
}

impl TryFrom<String> for BookingStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BookingStatus> for String {
    fn from(value: BookingStatus) -> Self {
        value.as_str().to_string()
    }
}
