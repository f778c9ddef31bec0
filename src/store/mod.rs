//! Keyed attendance record storage.
//!
//! A store offers single-key atomicity only: a commit names the version it
//! read and fails with [`StoreError::Conflict`] when anything else wrote the
//! key in between. Every successful commit is published to the key's
//! subscribers through the [`hub::SubscriptionHub`].

pub mod hub;
pub mod memory;
pub mod mysql;

use derive_more::Display;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::model::attendance::{AttendanceRecord, RecordKey};

pub use hub::Snapshot;
pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub record: AttendanceRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum StoreError {
    /// Another writer committed to the key after it was read.
    #[display(fmt = "conflicting concurrent write")]
    Conflict,
    #[display(fmt = "store unavailable: {}", _0)]
    Unavailable(String),
}

impl std::error::Error for StoreError {}

pub trait RecordStore: Send + Sync {
    /// Current record for `key`, if any.
    fn get<'a>(&'a self, key: &'a RecordKey)
    -> BoxFuture<'a, Result<Option<Versioned>, StoreError>>;

    /// Write `record` if the key is still at `expected` (`None`: must not exist).
    /// Returns the new version.
    fn commit<'a>(
        &'a self,
        key: &'a RecordKey,
        expected: Option<u64>,
        record: &'a AttendanceRecord,
    ) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Receiver primed with the current snapshot and updated on every commit.
    fn subscribe<'a>(
        &'a self,
        key: &'a RecordKey,
    ) -> BoxFuture<'a, Result<watch::Receiver<Snapshot>, StoreError>>;

    /// Called after a subscriber's receiver is dropped so idle keys stop
    /// holding a channel.
    fn release(&self, key: &RecordKey);
}
