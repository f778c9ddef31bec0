use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use sqlx::{FromRow, MySqlPool};
use tokio::sync::watch;
use tracing::{debug, error};

use super::hub::{Snapshot, SubscriptionHub};
use super::{RecordStore, StoreError, Versioned};
use crate::model::attendance::{
    AttendanceRecord, AttendanceStatus, EmployeeId, GpsLocation, Punch, PunchMethod, RecordKey,
};

/// MySQL error code for duplicate keys.
const DUPLICATE_KEY: &str = "23000";

#[derive(FromRow)]
struct AttendanceRow {
    employee_id: String,
    date: NaiveDate,
    status: String,
    check_in_at: Option<DateTime<Utc>>,
    check_in_lat: Option<f64>,
    check_in_lng: Option<f64>,
    check_in_method: Option<String>,
    check_out_at: Option<DateTime<Utc>>,
    check_out_lat: Option<f64>,
    check_out_lng: Option<f64>,
    check_out_method: Option<String>,
    total_hours: Option<f64>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Flattened punch columns: (timestamp, latitude, longitude, method).
type PunchColumns = (
    Option<DateTime<Utc>>,
    Option<f64>,
    Option<f64>,
    Option<String>,
);

fn punch_from_columns(
    at: Option<DateTime<Utc>>,
    lat: Option<f64>,
    lng: Option<f64>,
    method: Option<String>,
) -> Result<Option<Punch>, StoreError> {
    let Some(timestamp) = at else {
        return Ok(None);
    };
    let method = match method {
        Some(m) => PunchMethod::from_str(&m)
            .map_err(|_| StoreError::Unavailable(format!("unknown punch method {m:?}")))?,
        None => PunchMethod::Manual,
    };
    let location = match (lat, lng) {
        (Some(latitude), Some(longitude)) => Some(GpsLocation {
            latitude,
            longitude,
        }),
        _ => None,
    };
    Ok(Some(Punch {
        timestamp,
        location,
        method,
    }))
}

fn punch_to_columns(punch: Option<&Punch>) -> PunchColumns {
    match punch {
        Some(p) => (
            Some(p.timestamp),
            p.location.map(|l| l.latitude),
            p.location.map(|l| l.longitude),
            Some(p.method.to_string()),
        ),
        None => (None, None, None, None),
    }
}

impl TryFrom<AttendanceRow> for Versioned {
    type Error = StoreError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let status = AttendanceStatus::from_str(&row.status).map_err(|_| {
            StoreError::Unavailable(format!("unknown attendance status {:?}", row.status))
        })?;
        let check_in = punch_from_columns(
            row.check_in_at,
            row.check_in_lat,
            row.check_in_lng,
            row.check_in_method,
        )?;
        let check_out = punch_from_columns(
            row.check_out_at,
            row.check_out_lat,
            row.check_out_lng,
            row.check_out_method,
        )?;

        Ok(Versioned {
            version: row.version,
            record: AttendanceRecord {
                employee_id: EmployeeId::new(row.employee_id),
                date: row.date,
                status,
                check_in,
                check_out,
                total_hours: row.total_hours,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        })
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn is_duplicate_key(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(DUPLICATE_KEY))
}

/// Attendance records in the `attendance_records` table, guarded by a
/// `version` column.
pub struct MySqlStore {
    pool: MySqlPool,
    hub: SubscriptionHub,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            hub: SubscriptionHub::new(),
        }
    }

    async fn fetch(&self, key: &RecordKey) -> Result<Option<Versioned>, StoreError> {
        let row = sqlx::query_as::<_, AttendanceRow>(
            r#"
            SELECT employee_id, date, status,
                   check_in_at, check_in_lat, check_in_lng, check_in_method,
                   check_out_at, check_out_lat, check_out_lng, check_out_method,
                   total_hours, version, created_at, updated_at
            FROM attendance_records
            WHERE record_key = ?
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, key = %key, "Failed to read attendance record");
            unavailable(e)
        })?;

        row.map(Versioned::try_from).transpose()
    }

    async fn insert(&self, key: &RecordKey, record: &AttendanceRecord) -> Result<u64, StoreError> {
        let (in_at, in_lat, in_lng, in_method) = punch_to_columns(record.check_in.as_ref());
        let (out_at, out_lat, out_lng, out_method) = punch_to_columns(record.check_out.as_ref());

        let result = sqlx::query(
            r#"
            INSERT INTO attendance_records
                (record_key, employee_id, date, status,
                 check_in_at, check_in_lat, check_in_lng, check_in_method,
                 check_out_at, check_out_lat, check_out_lng, check_out_method,
                 total_hours, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(key.to_string())
        .bind(record.employee_id.as_str())
        .bind(record.date)
        .bind(record.status.as_ref())
        .bind(in_at)
        .bind(in_lat)
        .bind(in_lng)
        .bind(in_method)
        .bind(out_at)
        .bind(out_lat)
        .bind(out_lng)
        .bind(out_method)
        .bind(record.total_hours)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(1),
            Err(e) if is_duplicate_key(&e) => {
                debug!(key = %key, "Record created concurrently");
                Err(StoreError::Conflict)
            }
            Err(e) => {
                error!(error = %e, key = %key, "Failed to insert attendance record");
                Err(unavailable(e))
            }
        }
    }

    async fn update(
        &self,
        key: &RecordKey,
        expected: u64,
        record: &AttendanceRecord,
    ) -> Result<u64, StoreError> {
        let (in_at, in_lat, in_lng, in_method) = punch_to_columns(record.check_in.as_ref());
        let (out_at, out_lat, out_lng, out_method) = punch_to_columns(record.check_out.as_ref());

        // date and employee_id are part of the key and never rewritten
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET status = ?,
                check_in_at = ?, check_in_lat = ?, check_in_lng = ?, check_in_method = ?,
                check_out_at = ?, check_out_lat = ?, check_out_lng = ?, check_out_method = ?,
                total_hours = ?, updated_at = ?, version = version + 1
            WHERE record_key = ?
            AND version = ?
            "#,
        )
        .bind(record.status.as_ref())
        .bind(in_at)
        .bind(in_lat)
        .bind(in_lng)
        .bind(in_method)
        .bind(out_at)
        .bind(out_lat)
        .bind(out_lng)
        .bind(out_method)
        .bind(record.total_hours)
        .bind(record.updated_at)
        .bind(key.to_string())
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, key = %key, "Failed to update attendance record");
            unavailable(e)
        })?;

        if result.rows_affected() == 0 {
            debug!(key = %key, expected, "Record changed since it was read");
            return Err(StoreError::Conflict);
        }

        Ok(expected + 1)
    }

    async fn commit_inner(
        &self,
        key: &RecordKey,
        expected: Option<u64>,
        record: &AttendanceRecord,
    ) -> Result<u64, StoreError> {
        let version = match expected {
            None => self.insert(key, record).await?,
            Some(expected) => self.update(key, expected, record).await?,
        };
        self.hub.publish(key, version, record);
        Ok(version)
    }

    async fn subscribe_inner(
        &self,
        key: &RecordKey,
    ) -> Result<watch::Receiver<Snapshot>, StoreError> {
        // register first so a commit landing during the read still reaches us
        let rx = self.hub.subscribe(key)?;
        let current = match self.fetch(key).await {
            Ok(current) => current,
            Err(e) => {
                drop(rx);
                self.hub.release(key);
                return Err(e);
            }
        };
        if let Some(current) = current {
            self.hub.advance(
                key,
                Snapshot {
                    version: current.version,
                    record: Some(current.record),
                },
            );
        }
        Ok(rx)
    }
}

impl RecordStore for MySqlStore {
    fn get<'a>(
        &'a self,
        key: &'a RecordKey,
    ) -> BoxFuture<'a, Result<Option<Versioned>, StoreError>> {
        Box::pin(self.fetch(key))
    }

    fn commit<'a>(
        &'a self,
        key: &'a RecordKey,
        expected: Option<u64>,
        record: &'a AttendanceRecord,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(self.commit_inner(key, expected, record))
    }

    fn subscribe<'a>(
        &'a self,
        key: &'a RecordKey,
    ) -> BoxFuture<'a, Result<watch::Receiver<Snapshot>, StoreError>> {
        Box::pin(self.subscribe_inner(key))
    }

    fn release(&self, key: &RecordKey) {
        self.hub.release(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn punch_columns_keep_location_and_method() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let punch = Punch::at(
            at,
            Some(GpsLocation {
                latitude: 1.0,
                longitude: 2.0,
            }),
        );

        let (ts, lat, lng, method) = punch_to_columns(Some(&punch));
        assert_eq!(method.as_deref(), Some("gps"));
        let back = punch_from_columns(ts, lat, lng, method).unwrap();
        assert_eq!(back, Some(punch));
    }

    #[test]
    fn missing_timestamp_means_no_punch() {
        let back = punch_from_columns(None, Some(1.0), None, Some("gps".into())).unwrap();
        assert_eq!(back, None);
        assert_eq!(punch_to_columns(None), (None, None, None, None));
    }

    #[test]
    fn unknown_method_is_reported() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        let err = punch_from_columns(Some(at), None, None, Some("retina".into())).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
