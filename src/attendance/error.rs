use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum AttendanceError {
    #[display(fmt = "Attendance already recorded for today")]
    AlreadyRecorded,
    #[display(fmt = "No check-in found for today")]
    NoCheckIn,
    #[display(fmt = "Already checked out")]
    AlreadyCheckedOut,
    /// A concurrent write won the race; the transaction can be re-run.
    #[display(fmt = "Attendance record changed concurrently, please retry")]
    TransientStoreConflict,
    #[display(fmt = "Attendance store unreachable: {}", _0)]
    Unreachable(String),
}

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::AlreadyRecorded => "already_recorded",
            AttendanceError::NoCheckIn => "no_check_in",
            AttendanceError::AlreadyCheckedOut => "already_checked_out",
            AttendanceError::TransientStoreConflict => "transient_store_conflict",
            AttendanceError::Unreachable(_) => "unreachable",
        }
    }
}

impl std::error::Error for AttendanceError {}

impl From<StoreError> for AttendanceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AttendanceError::TransientStoreConflict,
            StoreError::Unavailable(reason) => AttendanceError::Unreachable(reason),
        }
    }
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::AlreadyRecorded
            | AttendanceError::NoCheckIn
            | AttendanceError::AlreadyCheckedOut => StatusCode::BAD_REQUEST,
            AttendanceError::TransientStoreConflict | AttendanceError::Unreachable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // store internals stay in the logs
        let message = match self {
            AttendanceError::Unreachable(_) => "Attendance service temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "message": message,
            "code": self.code(),
        }))
    }
}
