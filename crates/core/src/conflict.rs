//! Overlap detection for a single resource.
//!
//! Callers must pass a candidate set read inside the same transaction as the
//! transition that acts on the result.

use crate::domain::booking::{Booking, BookingId, ResourceRef};
use crate::domain::time::Interval;

/// Live bookings in `candidates` whose interval overlaps `target`, excluding `exclude_id`.
pub fn find_overlaps<'a>(
    target: &Interval,
    candidates: &'a [Booking],
    exclude_id: &BookingId,
) -> Vec<&'a Booking> {
    candidates
        .iter()
        .filter(|candidate| candidate.id != *exclude_id)
        .filter(|candidate| candidate.status.is_live())
        .filter(|candidate| candidate.interval.overlaps(target))
        .collect()
}

/// Overlapping bookings split by whether they already hold the resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConflictScan {
    /// Past the locking stage; the target cannot lock.
    pub locked: Vec<BookingId>,
    /// Still competing; they lose if the target locks.
    pub competitors: Vec<BookingId>,
}

impl ConflictScan {
    pub fn is_blocked(&self) -> bool {
        !self.locked.is_empty()
    }
}

pub fn scan(
    resource: &ResourceRef,
    target: &Interval,
    candidates: &[Booking],
    exclude_id: &BookingId,
) -> ConflictScan {
    let mut result = ConflictScan::default();
    let same_resource: Vec<Booking> = candidates
        .iter()
        .filter(|candidate| {
            candidate.resource.kind == resource.kind && candidate.resource.id == resource.id
        })
        .cloned()
        .collect();

    for overlap in find_overlaps(target, &same_resource, exclude_id) {
        if overlap.status.is_locked() {
            result.locked.push(overlap.id.clone());
        } else {
            result.competitors.push(overlap.id.clone());
        }
    }

    result.locked.sort();
    result.competitors.sort();
    result
}
