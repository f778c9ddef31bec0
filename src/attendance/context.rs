use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::model::attendance::{EmployeeId, RecordKey};

/// Widest offset in use anywhere (UTC+14 / UTC-12 fit comfortably).
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return None;
    }
    FixedOffset::east_opt(minutes * 60)
}

/// Who is calling and which calendar they live in.
///
/// The calendar day of a punch is resolved from server time shifted by the
/// caller's offset, so a client can pick its zone but not its clock.
#[derive(Debug, Clone)]
pub struct CallerContext {
    employee_id: EmployeeId,
    utc_offset: FixedOffset,
}

impl CallerContext {
    pub fn new(employee_id: EmployeeId, utc_offset: FixedOffset) -> Self {
        Self {
            employee_id,
            utc_offset,
        }
    }

    pub fn employee_id(&self) -> &EmployeeId {
        &self.employee_id
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.utc_offset).date_naive()
    }

    pub fn record_key(&self, now: DateTime<Utc>) -> RecordKey {
        RecordKey::new(self.employee_id.clone(), self.local_date(now))
    }
}
