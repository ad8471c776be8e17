use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::booking::{BookingId, ResourceKind};
use crate::domain::user::ApproverRef;
use crate::workflow::stages::Stage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn generate() -> Self {
        Self(format!("TK-{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Single-use, time-boxed credential for one approval action on one booking.
///
/// Only the SHA-256 digest of the secret is stored; the secret itself lives in
/// the outbound link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub id: TokenId,
    pub booking_id: BookingId,
    pub resource_kind: ResourceKind,
    pub stage: Stage,
    pub approver: Option<ApproverRef>,
    pub secret_digest: String,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl ApprovalToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired(now)
    }
}
