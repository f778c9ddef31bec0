use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Opaque, stable employee identifier (`EMP-XXXXXXXX` for provisioned staff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "EMP-1A2B3C4D")]
pub struct EmployeeId(String);

impl EmployeeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one attendance record: `{employee_id}_{YYYY-MM-DD}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    employee_id: EmployeeId,
    date: NaiveDate,
}

impl RecordKey {
    pub fn new(employee_id: EmployeeId, date: NaiveDate) -> Self {
        Self { employee_id, date }
    }

    pub fn employee_id(&self) -> &EmployeeId {
        &self.employee_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.employee_id, self.date.format("%Y-%m-%d"))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    HalfDay,
    Holiday,
    Leave,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PunchMethod {
    Manual,
    Gps,
    Qr,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "latitude": 23.8103, "longitude": 90.4125 }))]
pub struct GpsLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// A single check-in or check-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Punch {
    #[schema(example = "2026-01-01T09:00:00Z", format = "date-time", value_type = String)]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GpsLocation>,
    pub method: PunchMethod,
}

impl Punch {
    /// A punch taken at `timestamp`; a location marks it as GPS-verified.
    pub fn at(timestamp: DateTime<Utc>, location: Option<GpsLocation>) -> Self {
        let method = if location.is_some() {
            PunchMethod::Gps
        } else {
            PunchMethod::Manual
        };
        Self {
            timestamp,
            location,
            method,
        }
    }
}

/// Where a record sits in the single daily cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    Empty,
    CheckedIn,
    CheckedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "employeeId": "EMP-1A2B3C4D",
    "date": "2026-01-01",
    "status": "present",
    "checkIn": { "timestamp": "2026-01-01T09:00:00Z", "method": "manual" },
    "checkOut": { "timestamp": "2026-01-01T17:30:00Z", "method": "manual" },
    "totalHours": 8.5,
    "createdAt": "2026-01-01T09:00:00Z",
    "updatedAt": "2026-01-01T17:30:00Z"
}))]
pub struct AttendanceRecord {
    pub employee_id: EmployeeId,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<Punch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<Punch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<f64>,
    #[schema(format = "date-time", value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(format = "date-time", value_type = String)]
    pub updated_at: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Fresh record for the first check-in of the day.
    pub fn checked_in(key: &RecordKey, punch: Punch) -> Self {
        let now = punch.timestamp;
        Self {
            employee_id: key.employee_id().clone(),
            date: key.date(),
            status: AttendanceStatus::Present,
            check_in: Some(punch),
            check_out: None,
            total_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.employee_id.clone(), self.date)
    }

    pub fn state(&self) -> DayState {
        match (&self.check_in, &self.check_out) {
            (None, None) => DayState::Empty,
            (Some(_), None) => DayState::CheckedIn,
            // a check-out without a check-in is never written; treat it as closed
            (_, Some(_)) => DayState::CheckedOut,
        }
    }

    pub fn is_checked_in(&self) -> bool {
        self.state() == DayState::CheckedIn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn record_key_formats_employee_and_day() {
        let key = RecordKey::new(
            EmployeeId::new("EMP-1A2B3C4D"),
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
        );
        assert_eq!(key.to_string(), "EMP-1A2B3C4D_2026-01-05");
    }

    #[test]
    fn punch_method_follows_location() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        assert_eq!(Punch::at(at, None).method, PunchMethod::Manual);
        let gps = Punch::at(
            at,
            Some(GpsLocation {
                latitude: 1.0,
                longitude: 2.0,
            }),
        );
        assert_eq!(gps.method, PunchMethod::Gps);
    }

    #[test]
    fn status_round_trips_through_column_text() {
        assert_eq!(AttendanceStatus::HalfDay.to_string(), "half-day");
        assert_eq!(
            AttendanceStatus::from_str("leave").unwrap(),
            AttendanceStatus::Leave
        );
        assert_eq!(PunchMethod::from_str("qr").unwrap(), PunchMethod::Qr);
    }

    #[test]
    fn json_shape_uses_camel_case_and_omits_missing_punches() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let key = RecordKey::new(
            EmployeeId::new("e1"),
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
        );
        let record = AttendanceRecord::checked_in(&key, Punch::at(at, None));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["employeeId"], "e1");
        assert_eq!(json["date"], "2026-01-05");
        assert_eq!(json["status"], "present");
        assert_eq!(json["checkIn"]["method"], "manual");
        assert!(json.get("checkOut").is_none());
        assert!(json.get("totalHours").is_none());
        assert_eq!(record.state(), DayState::CheckedIn);
    }
}
