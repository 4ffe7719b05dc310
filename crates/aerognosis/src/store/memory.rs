use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{NewRecord, RecordId, RecordPatch, RecordStatus, SubmissionRecord};

use super::RecordStore;

const EVENT_CAPACITY: usize = 256;

/// A status change observed by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    /// Record that changed.
    pub id: RecordId,
    /// Its status after the write.
    pub status: RecordStatus,
}

/// In-process record store with live status subscriptions.
///
/// Every successful `create` and `patch` is broadcast after the write, so a
/// subscriber sees each record's statuses in the order they were stored.
/// Slow subscribers may lag and miss events; writes never block on them.
#[derive(Debug)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<RecordId, SubmissionRecord>>,
    next_id: AtomicU64,
    events: broadcast::Sender<RecordEvent>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Watch status changes from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Whether the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RecordId, SubmissionRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::internal("memory record store poisoned"))
    }

    fn publish(&self, id: &RecordId, status: RecordStatus) {
        // No receivers is not an error.
        let _ = self.events.send(RecordEvent {
            id: id.clone(),
            status,
        });
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, record: &NewRecord) -> Result<RecordId> {
        let id = RecordId::new(self.next_id.fetch_add(1, Ordering::Relaxed).to_string());
        let stored = SubmissionRecord::created(id.clone(), record.clone());
        self.lock()?.insert(id.clone(), stored);
        debug!("Created in-memory submission {}", id);
        self.publish(&id, RecordStatus::Uploading);
        Ok(id)
    }

    async fn patch(&self, id: &RecordId, patch: &RecordPatch) -> Result<()> {
        {
            let mut records = self.lock()?;
            let record = records.get_mut(id).ok_or_else(|| Error::RecordNotFound {
                id: id.to_string(),
            })?;
            record.apply_patch(patch);
        }
        self.publish(id, patch.state.status());
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<SubmissionRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }
}
