use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::model::attendance::AttendanceRecord;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Two fraction digits, half away from zero.
pub fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

/// Hours from `from` to `to`, clamped at zero and rounded to 2 decimals.
///
/// `None` when the difference cannot be expressed as a finite number of hours.
pub fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<f64> {
    let millis = to.signed_duration_since(from).num_milliseconds();
    let hours = round_hours(millis as f64 / MS_PER_HOUR);
    if !hours.is_finite() {
        return None;
    }
    // also folds -0.0 into 0.0
    Some(if hours > 0.0 { hours } else { 0.0 })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct WorkedHours {
    #[schema(example = 8.5)]
    pub hours: f64,
    /// Still checked in; the value grows until check-out.
    pub running: bool,
}

/// Display value for a day's record at `now`.
pub fn worked_hours(record: Option<&AttendanceRecord>, now: DateTime<Utc>) -> Option<WorkedHours> {
    let record = record?;
    let check_in = record.check_in.as_ref()?;

    match &record.check_out {
        Some(check_out) => {
            let hours = record
                .total_hours
                .or_else(|| elapsed_hours(check_in.timestamp, check_out.timestamp))?;
            Some(WorkedHours {
                hours,
                running: false,
            })
        }
        None => elapsed_hours(check_in.timestamp, now).map(|hours| WorkedHours {
            hours,
            running: true,
        }),
    }
}
