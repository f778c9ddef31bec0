use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use utoipa::ToSchema;

use super::context::CallerContext;
use super::engine::AttendanceService;
use super::error::AttendanceError;
use super::metrics::{WorkedHours, worked_hours};
use crate::model::attendance::{AttendanceRecord, RecordKey};
use crate::store::{RecordStore, Snapshot};

/// What a "today" screen needs: the record, whether the employee is
/// currently in, and the hours to show.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveView {
    pub record: Option<AttendanceRecord>,
    pub checked_in: bool,
    pub hours: Option<WorkedHours>,
}

impl LiveView {
    pub fn at(record: Option<AttendanceRecord>, now: DateTime<Utc>) -> Self {
        let checked_in = record.as_ref().is_some_and(AttendanceRecord::is_checked_in);
        let hours = worked_hours(record.as_ref(), now);
        Self {
            record,
            checked_in,
            hours,
        }
    }
}

/// Cancels a subscription. Idempotent; dropping the handle cancels too.
#[derive(Debug)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Hands the key back to the store when the subscription goes away.
struct ChannelLease {
    store: Arc<dyn RecordStore>,
    key: RecordKey,
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

/// Pull-style subscription to one day's record.
pub struct TodaySubscription {
    // fields drop in order: the receiver must be gone before the lease runs
    rx: watch::Receiver<Snapshot>,
    lease: ChannelLease,
    token: CancellationToken,
}

impl TodaySubscription {
    pub fn key(&self) -> &RecordKey {
        &self.lease.key
    }

    /// Latest record, marking it as seen.
    pub fn current(&mut self) -> Option<AttendanceRecord> {
        self.rx.borrow_and_update().record.clone()
    }

    /// Waits for the next write to the key. `None` once cancelled or once the
    /// store is gone.
    pub async fn next(&mut self) -> Option<Option<AttendanceRecord>> {
        let changed = tokio::select! {
            biased;
            _ = self.token.cancelled() => return None,
            changed = self.rx.changed() => changed,
        };
        match changed {
            Ok(()) if !self.token.is_cancelled() => Some(self.current()),
            _ => None,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            token: self.token.clone(),
        }
    }
}

impl AttendanceService {
    /// Subscribe to the record of the caller's current day.
    pub async fn subscribe_today(
        &self,
        ctx: &CallerContext,
    ) -> Result<TodaySubscription, AttendanceError> {
        let key = ctx.record_key(self.clock.now());
        let rx = self.store.subscribe(&key).await?;
        debug!(key = %key, "Opened attendance subscription");
        Ok(TodaySubscription {
            rx,
            lease: ChannelLease {
                store: Arc::clone(&self.store),
                key,
            },
            token: CancellationToken::new(),
        })
    }

    /// Calls `on_change` with today's record right away, then after every
    /// write to it, until the returned handle is cancelled or dropped.
    pub async fn watch_today<F>(
        &self,
        ctx: &CallerContext,
        mut on_change: F,
    ) -> Result<SubscriptionHandle, AttendanceError>
    where
        F: FnMut(Option<AttendanceRecord>) + Send + 'static,
    {
        let mut subscription = self.subscribe_today(ctx).await?;
        let handle = subscription.handle();

        on_change(subscription.current());

        tokio::spawn(async move {
            while let Some(record) = subscription.next().await {
                on_change(record);
            }
            debug!(key = %subscription.key(), "Attendance subscription closed");
        });

        Ok(handle)
    }

    /// Like [`watch_today`](Self::watch_today) but delivers a [`LiveView`],
    /// refreshed on a timer while the employee is checked in.
    pub async fn watch_today_hours<F>(
        &self,
        ctx: &CallerContext,
        mut on_view: F,
    ) -> Result<SubscriptionHandle, AttendanceError>
    where
        F: FnMut(LiveView) + Send + 'static,
    {
        let mut subscription = self.subscribe_today(ctx).await?;
        let handle = subscription.handle();
        let clock = Arc::clone(&self.clock);

        let mut record = subscription.current();
        on_view(LiveView::at(record.clone(), clock.now()));

        let period = self.refresh_every;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                let running = record.as_ref().is_some_and(AttendanceRecord::is_checked_in);
                tokio::select! {
                    next = subscription.next() => match next {
                        Some(latest) => record = latest,
                        None => break,
                    },
                    _ = ticker.tick(), if running => {}
                }
                if subscription.is_cancelled() {
                    break;
                }
                on_view(LiveView::at(record.clone(), clock.now()));
            }
            debug!(key = %subscription.key(), "Running hours subscription closed");
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::clock::ManualClock;
    use crate::attendance::context::offset_from_minutes;
    use crate::attendance::retry::RetryPolicy;
    use crate::model::attendance::EmployeeId;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, s).unwrap()
    }

    fn ctx(id: &str) -> CallerContext {
        CallerContext::new(EmployeeId::new(id), offset_from_minutes(0).unwrap())
    }

    fn service_at(now: DateTime<Utc>) -> (AttendanceService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let service = AttendanceService::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
            Duration::from_secs(30),
        );
        (service, clock)
    }

    /// Lets spawned subscription tasks drain their channels.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl FnMut(T) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| sink.lock().unwrap().push(value))
    }

    #[tokio::test]
    async fn watcher_gets_current_state_then_each_write() {
        let (service, clock) = service_at(at(9, 0, 0));
        let (seen, on_change) = recorder::<Option<AttendanceRecord>>();

        let handle = service.watch_today(&ctx("e1"), on_change).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![None]);

        service.check_in(&ctx("e1"), None).await.unwrap();
        settle().await;
        clock.set(at(17, 30, 0));
        service.check_out(&ctx("e1"), None).await.unwrap();
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].as_ref().unwrap().is_checked_in());
        assert_eq!(seen[2].as_ref().unwrap().total_hours, Some(8.5));
        drop(seen);
        handle.cancel();
    }

    #[tokio::test]
    async fn independent_watchers_each_receive_updates() {
        let (service, _) = service_at(at(9, 0, 0));
        let (first, on_first) = recorder::<Option<AttendanceRecord>>();
        let (second, on_second) = recorder::<Option<AttendanceRecord>>();

        let _a = service.watch_today(&ctx("e1"), on_first).await.unwrap();
        let _b = service.watch_today(&ctx("e1"), on_second).await.unwrap();

        service.check_in(&ctx("e1"), None).await.unwrap();
        settle().await;

        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(second.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_watcher_stays_silent_and_cancel_is_idempotent() {
        let (service, clock) = service_at(at(9, 0, 0));
        let (seen, on_change) = recorder::<Option<AttendanceRecord>>();

        let handle = service.watch_today(&ctx("e1"), on_change).await.unwrap();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        service.check_in(&ctx("e1"), None).await.unwrap();
        clock.set(at(17, 0, 0));
        service.check_out(&ctx("e1"), None).await.unwrap();
        settle().await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels() {
        let (service, _) = service_at(at(9, 0, 0));
        let (seen, on_change) = recorder::<Option<AttendanceRecord>>();

        drop(service.watch_today(&ctx("e1"), on_change).await.unwrap());
        service.check_in(&ctx("e1"), None).await.unwrap();
        settle().await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pull_subscription_ends_after_cancel() {
        let (service, _) = service_at(at(9, 0, 0));
        let mut subscription = service.subscribe_today(&ctx("e1")).await.unwrap();
        assert_eq!(subscription.current(), None);

        service.check_in(&ctx("e1"), None).await.unwrap();
        let record = subscription.next().await.unwrap().unwrap();
        assert!(record.is_checked_in());

        subscription.cancel();
        assert_eq!(subscription.next().await, None);
    }

    #[tokio::test]
    async fn ended_subscriptions_free_their_channels() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(9, 0, 0)));
        let service = AttendanceService::new(
            store.clone(),
            clock.clone(),
            RetryPolicy::default(),
            Duration::from_secs(30),
        );

        // a finished day never sees another write
        service.check_in(&ctx("done"), None).await.unwrap();
        clock.set(at(17, 0, 0));
        service.check_out(&ctx("done"), None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..200 {
            let (_, on_change) = recorder::<Option<AttendanceRecord>>();
            handles.push(service.watch_today(&ctx(&format!("e{i}")), on_change).await.unwrap());
        }
        let (_, on_view) = recorder::<LiveView>();
        handles.push(service.watch_today_hours(&ctx("done"), on_view).await.unwrap());
        let pull = service.subscribe_today(&ctx("done")).await.unwrap();
        assert_eq!(store.open_channels(), 201);

        for handle in &handles {
            handle.cancel();
        }
        settle().await;
        // the pull subscription still holds its key
        assert_eq!(store.open_channels(), 1);

        drop(pull);
        drop(handles);
        settle().await;
        assert_eq!(store.open_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_hours_refresh_on_timer_until_cancelled() {
        let (service, clock) = service_at(at(9, 0, 0));
        service.check_in(&ctx("e1"), None).await.unwrap();

        let (views, on_view) = recorder::<LiveView>();
        let handle = service
            .watch_today_hours(&ctx("e1"), on_view)
            .await
            .unwrap();
        {
            let views = views.lock().unwrap();
            assert_eq!(views.len(), 1);
            assert!(views[0].checked_in);
            assert_eq!(views[0].hours.unwrap().hours, 0.0);
        }

        clock.advance(ChronoDuration::minutes(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        {
            let views = views.lock().unwrap();
            assert_eq!(views.len(), 2);
            let hours = views[1].hours.unwrap();
            assert_eq!(hours.hours, 0.5);
            assert!(hours.running);
        }

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(views.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_idle_once_checked_out() {
        let (service, clock) = service_at(at(9, 0, 0));
        service.check_in(&ctx("e1"), None).await.unwrap();

        let (views, on_view) = recorder::<LiveView>();
        let _handle = service
            .watch_today_hours(&ctx("e1"), on_view)
            .await
            .unwrap();

        clock.set(at(17, 30, 0));
        service.check_out(&ctx("e1"), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        let views = views.lock().unwrap();
        assert_eq!(views.len(), 2);
        assert!(!views[1].checked_in);
        assert_eq!(
            views[1].hours,
            Some(WorkedHours {
                hours: 8.5,
                running: false
            })
        );
    }
}
