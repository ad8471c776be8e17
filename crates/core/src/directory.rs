//! User directory port and stage approver resolution.

use async_trait::async_trait;

use crate::domain::booking::Booking;
use crate::domain::user::{ApproverRef, Role, UserId, UserProfile};
use crate::workflow::stages::{Stage, StageAuthority};
use crate::workflow::store::StoreError;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError>;

    /// First user holding `role`, in a stable directory order.
    async fn first_with_role(&self, role: Role) -> Result<Option<UserProfile>, StoreError>;

    /// First user in `division` whose job title is manager.
    async fn division_manager(&self, division: &str) -> Result<Option<UserProfile>, StoreError>;
}

/// Who should be asked to act on `booking` at `stage`.
///
/// The manager stage uses the binding frozen at submission and only falls back
/// to a live division lookup when nothing was bound. Role stages are resolved
/// live, at the moment the previous stage completes.
pub async fn resolve_approver(
    directory: &dyn UserDirectory,
    booking: &Booking,
    stage: Stage,
) -> Result<Option<ApproverRef>, StoreError> {
    if let Some(bound) = booking.stage_record(stage).and_then(|record| record.approver.clone()) {
        return Ok(Some(bound));
    }

    let profile = match stage.authority() {
        StageAuthority::DivisionManager => {
            directory.division_manager(&booking.requester.division).await?
        }
        StageAuthority::Role(role) => directory.first_with_role(role).await?,
    };
    Ok(profile.map(|profile| profile.approver_ref()))
}
