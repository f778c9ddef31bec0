use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, instrument, warn};

use super::clock::Clock;
use super::context::CallerContext;
use super::error::AttendanceError;
use super::metrics::elapsed_hours;
use super::retry::RetryPolicy;
use crate::model::attendance::{
    AttendanceRecord, AttendanceStatus, DayState, GpsLocation, Punch, RecordKey,
};
use crate::store::RecordStore;

/// Check-in transition applied to the record read inside the transaction.
pub fn apply_check_in(
    key: &RecordKey,
    current: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
    location: Option<GpsLocation>,
) -> Result<AttendanceRecord, AttendanceError> {
    let punch = Punch::at(now, location);

    let Some(current) = current else {
        return Ok(AttendanceRecord::checked_in(key, punch));
    };

    if current.state() != DayState::Empty {
        return Err(AttendanceError::AlreadyRecorded);
    }

    if current.status != AttendanceStatus::Present {
        info!(
            key = %key,
            previous_status = %current.status,
            "Check-in overrides placeholder status"
        );
    }

    Ok(AttendanceRecord {
        status: AttendanceStatus::Present,
        check_in: Some(punch),
        updated_at: now,
        ..current.clone()
    })
}

/// Check-out transition applied to the record read inside the transaction.
pub fn apply_check_out(
    current: Option<&AttendanceRecord>,
    now: DateTime<Utc>,
    location: Option<GpsLocation>,
) -> Result<AttendanceRecord, AttendanceError> {
    let current = current.ok_or(AttendanceError::NoCheckIn)?;
    let check_in = current.check_in.as_ref().ok_or(AttendanceError::NoCheckIn)?;
    if current.check_out.is_some() {
        return Err(AttendanceError::AlreadyCheckedOut);
    }

    let total_hours = elapsed_hours(check_in.timestamp, now);
    if total_hours.is_none() {
        warn!(
            employee_id = %current.employee_id,
            "Could not compute total hours, leaving them unset"
        );
    }

    Ok(AttendanceRecord {
        check_out: Some(Punch::at(now, location)),
        total_hours,
        updated_at: now,
        ..current.clone()
    })
}

/// The check-in/check-out protocol over a [`RecordStore`].
///
/// Each operation reads the day's record and commits conditioned on the
/// version it read; a lost race re-runs the whole body through the
/// [`RetryPolicy`].
#[derive(Clone)]
pub struct AttendanceService {
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    pub(super) refresh_every: Duration,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        refresh_every: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retry,
            refresh_every,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stores keep millisecond precision; punches are cut to match so a
    /// published record equals the one read back.
    fn punch_time(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    #[instrument(name = "attendance_check_in", skip_all, fields(employee_id = %ctx.employee_id()))]
    pub async fn check_in(
        &self,
        ctx: &CallerContext,
        location: Option<GpsLocation>,
    ) -> Result<(), AttendanceError> {
        let now = self.punch_time();
        // the day is fixed here, once, for every attempt
        let key = ctx.record_key(now);
        let key_ref = &key;
        let store = self.store.as_ref();

        self.retry
            .run("check_in", move || async move {
                let current = store.get(key_ref).await?;
                let next = apply_check_in(
                    key_ref,
                    current.as_ref().map(|v| &v.record),
                    now,
                    location,
                )?;
                store
                    .commit(key_ref, current.map(|v| v.version), &next)
                    .await?;
                Ok::<_, AttendanceError>(())
            })
            .await?;

        info!(key = %key, gps = location.is_some(), "Checked in");
        Ok(())
    }

    #[instrument(name = "attendance_check_out", skip_all, fields(employee_id = %ctx.employee_id()))]
    pub async fn check_out(
        &self,
        ctx: &CallerContext,
        location: Option<GpsLocation>,
    ) -> Result<(), AttendanceError> {
        let now = self.punch_time();
        let key = ctx.record_key(now);
        let key_ref = &key;
        let store = self.store.as_ref();

        let total_hours = self
            .retry
            .run("check_out", move || async move {
                let current = store.get(key_ref).await?;
                let next = apply_check_out(current.as_ref().map(|v| &v.record), now, location)?;
                store
                    .commit(key_ref, current.map(|v| v.version), &next)
                    .await?;
                Ok::<_, AttendanceError>(next.total_hours)
            })
            .await?;

        info!(key = %key, ?total_hours, "Checked out");
        Ok(())
    }

    /// Display snapshot of today's record; never feed this into a mutation.
    pub async fn get_today(
        &self,
        ctx: &CallerContext,
    ) -> Result<Option<AttendanceRecord>, AttendanceError> {
        let key = ctx.record_key(self.clock.now());
        let current = self.store.get(&key).await?;
        Ok(current.map(|v| v.record))
    }
}
