use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::StoreError;
use crate::model::attendance::{AttendanceRecord, RecordKey};

/// What subscribers see for one key. Version 0 means "no record yet".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub version: u64,
    pub record: Option<AttendanceRecord>,
}

/// In-process fan-out of committed records, one watch channel per key.
///
/// Updates only move forward in version, so a stale read racing a commit can
/// never overwrite a newer snapshot.
#[derive(Default)]
pub struct SubscriptionHub {
    channels: Mutex<HashMap<RecordKey, watch::Sender<Snapshot>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RecordKey, watch::Sender<Snapshot>>>, StoreError> {
        self.channels
            .lock()
            .map_err(|_| StoreError::Unavailable("subscription hub lock poisoned".into()))
    }

    pub fn subscribe(&self, key: &RecordKey) -> Result<watch::Receiver<Snapshot>, StoreError> {
        let mut channels = self.lock()?;
        let tx = channels
            .entry(key.clone())
            .or_insert_with(|| watch::channel(Snapshot::default()).0);
        debug!(key = %key, subscribers = tx.receiver_count() + 1, "Subscribed to record");
        Ok(tx.subscribe())
    }

    /// Push a committed record to every live subscriber of `key`.
    pub fn publish(&self, key: &RecordKey, version: u64, record: &AttendanceRecord) {
        self.advance(
            key,
            Snapshot {
                version,
                record: Some(record.clone()),
            },
        );
    }

    /// Advance the channel for `key` to `snapshot` if it is newer.
    pub fn advance(&self, key: &RecordKey, snapshot: Snapshot) {
        let mut channels = match self.lock() {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, key = %key, "Dropping record update");
                return;
            }
        };

        let Some(tx) = channels.get(key) else {
            return;
        };

        if tx.receiver_count() == 0 {
            channels.remove(key);
            return;
        }

        tx.send_if_modified(|current| {
            if snapshot.version > current.version {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }

    /// Drop the channel for `key` once its last receiver is gone.
    pub fn release(&self, key: &RecordKey) {
        let Ok(mut channels) = self.lock() else {
            return;
        };
        if channels.get(key).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(key);
            debug!(key = %key, "Closed record channel");
        }
    }

    /// Number of keys with an open channel.
    pub fn channel_count(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }
}
