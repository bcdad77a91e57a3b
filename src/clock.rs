//! Time source for gate checks and streak computation.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};

/// Supplies "now" and the user's calendar day for a timestamp.
///
/// Calendar-day mapping lives here so DST and offset handling are decided
/// in one place and the streak walk only compares `NaiveDate`s.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day of `instant` in the user's timezone.
    fn local_day(&self, instant: &DateTime<Utc>) -> NaiveDate;

    /// Today's calendar day in the user's timezone.
    fn today(&self) -> NaiveDate {
        self.local_day(&self.now())
    }
}

/// System clock using the host's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_day(&self, instant: &DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&Local).date_naive()
    }
}

/// Clock pinned to a fixed instant and UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    /// Fixed clock in UTC.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn local_day(&self, instant: &DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}
