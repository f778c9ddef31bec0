use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::AttendanceError;

/// Bounded re-run of an optimistic transaction body.
///
/// Only [`AttendanceError::TransientStoreConflict`] is retried; every other
/// outcome is returned as-is. Running out of attempts is reported as
/// [`AttendanceError::Unreachable`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut body: F) -> Result<T, AttendanceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttendanceError>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            match body().await {
                Err(AttendanceError::TransientStoreConflict) => {
                    warn!(operation, attempt, attempts, "Transaction conflicted");
                    if attempt < attempts && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
                outcome => return outcome,
            }
        }

        Err(AttendanceError::Unreachable(format!(
            "{operation} still conflicting after {attempts} attempts"
        )))
    }
}
