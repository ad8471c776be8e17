use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Epoch pair used for timestamps on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WireTimestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl WireTimestamp {
    pub fn to_datetime(self) -> Result<DateTime<Utc>, DomainError> {
        if self.nanoseconds >= 1_000_000_000 {
            return Err(DomainError::InvariantViolation(format!(
                "timestamp nanoseconds out of range: {}",
                self.nanoseconds
            )));
        }

        Utc.timestamp_opt(self.seconds, self.nanoseconds).single().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "timestamp out of range: {}s {}ns",
                self.seconds, self.nanoseconds
            ))
        })
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self { seconds: value.timestamp(), nanoseconds: value.timestamp_subsec_nanos() }
    }
}

/// Half-open reservation window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for Interval {
    type Error = DomainError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        if start >= end {
            return Err(DomainError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn from_wire(start: WireTimestamp, end: WireTimestamp) -> Result<Self, DomainError> {
        Self::new(start.to_datetime()?, end.to_datetime()?)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }

    /// Renders the window in the display timezone, e.g. `20-10-2026 10:00 - 11:00 WIB`.
    pub fn display_in(&self, tz: Tz) -> String {
        let start = self.start.with_timezone(&tz);
        let end = self.end.with_timezone(&tz);
        if start.date_naive() == end.date_naive() {
            format!("{} - {}", start.format("%d-%m-%Y %H:%M"), end.format("%H:%M %Z"))
        } else {
            format!("{} - {}", start.format("%d-%m-%Y %H:%M"), end.format("%d-%m-%Y %H:%M %Z"))
        }
    }
}
