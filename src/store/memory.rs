use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use futures::future::{self, BoxFuture};
use tokio::sync::watch;
use tracing::debug;

use super::hub::{Snapshot, SubscriptionHub};
use super::{RecordStore, StoreError, Versioned};
use crate::model::attendance::{AttendanceRecord, RecordKey};

/// Process-local record store.
///
/// Reads, commits and subscription priming all happen under one lock, which
/// is what gives a commit its compare-and-set semantics.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, Versioned>>,
    hub: SubscriptionHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RecordKey, Versioned>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Place a record outside the transaction engine, e.g. a holiday
    /// placeholder written by the leave or calendar collaborators.
    pub fn seed(&self, record: AttendanceRecord) -> Result<u64, StoreError> {
        let key = record.key();
        let mut records = self.lock()?;
        let version = records.get(&key).map_or(1, |v| v.version + 1);
        self.hub.publish(&key, version, &record);
        records.insert(key, Versioned { version, record });
        Ok(version)
    }

    fn get_now(&self, key: &RecordKey) -> Result<Option<Versioned>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn commit_now(
        &self,
        key: &RecordKey,
        expected: Option<u64>,
        record: &AttendanceRecord,
    ) -> Result<u64, StoreError> {
        let mut records = self.lock()?;
        let current = records.get(key).map(|v| v.version);
        if current != expected {
            debug!(key = %key, ?expected, ?current, "Version mismatch on commit");
            return Err(StoreError::Conflict);
        }

        let version = current.unwrap_or(0) + 1;
        records.insert(
            key.clone(),
            Versioned {
                version,
                record: record.clone(),
            },
        );
        self.hub.publish(key, version, record);
        Ok(version)
    }

    #[cfg(test)]
    pub fn open_channels(&self) -> usize {
        self.hub.channel_count()
    }

    fn subscribe_now(&self, key: &RecordKey) -> Result<watch::Receiver<Snapshot>, StoreError> {
        let records = self.lock()?;
        let rx = self.hub.subscribe(key)?;
        if let Some(current) = records.get(key) {
            self.hub.publish(key, current.version, &current.record);
        }
        Ok(rx)
    }
}

impl RecordStore for MemoryStore {
    fn get<'a>(
        &'a self,
        key: &'a RecordKey,
    ) -> BoxFuture<'a, Result<Option<Versioned>, StoreError>> {
        Box::pin(future::ready(self.get_now(key)))
    }

    fn commit<'a>(
        &'a self,
        key: &'a RecordKey,
        expected: Option<u64>,
        record: &'a AttendanceRecord,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(future::ready(self.commit_now(key, expected, record)))
    }

    fn subscribe<'a>(
        &'a self,
        key: &'a RecordKey,
    ) -> BoxFuture<'a, Result<watch::Receiver<Snapshot>, StoreError>> {
        Box::pin(future::ready(self.subscribe_now(key)))
    }

    fn release(&self, key: &RecordKey) {
        self.hub.release(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::{EmployeeId, Punch};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn key() -> RecordKey {
        RecordKey::new(
            EmployeeId::new("e1"),
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
        )
    }

    fn record() -> AttendanceRecord {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        AttendanceRecord::checked_in(&key(), Punch::at(at, None))
    }

    #[tokio::test]
    async fn create_requires_absent_key() {
        let store = MemoryStore::new();
        assert_eq!(store.commit(&key(), None, &record()).await, Ok(1));
        assert_eq!(
            store.commit(&key(), None, &record()).await,
            Err(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let store = MemoryStore::new();
        store.commit(&key(), None, &record()).await.unwrap();

        assert_eq!(store.commit(&key(), Some(1), &record()).await, Ok(2));
        assert_eq!(
            store.commit(&key(), Some(1), &record()).await,
            Err(StoreError::Conflict)
        );
        assert_eq!(store.get(&key()).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn subscribers_see_current_then_committed_snapshots() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(&key()).await.unwrap();
        assert_eq!(rx.borrow_and_update().record, None);

        store.commit(&key(), None, &record()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().record, Some(record()));

        let mut late = store.subscribe(&key()).await.unwrap();
        assert_eq!(late.borrow_and_update().version, 1);
    }
}
