//! Record store adapters.
//!
//! The pipeline only ever creates a record, patches it and reads it back.
//! [`SqliteRecordStore`] is the durable ledger used by the CLI;
//! [`MemoryRecordStore`] keeps records in process and lets callers watch
//! status changes as they happen.

pub mod migrations;
pub mod schema;

mod memory;
mod sqlite;

pub use memory::{MemoryRecordStore, RecordEvent};
pub use sqlite::{SqliteRecordStore, StoreStats};

use crate::error::Result;
use crate::record::{NewRecord, RecordId, RecordPatch, SubmissionRecord};

/// Document store holding submission records.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Insert a record in `uploading` and return its store-assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn create(&self, record: &NewRecord) -> Result<RecordId>;

    /// Replace the state of an existing record and merge its timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RecordNotFound`] for an unknown id, or a
    /// backend error.
    async fn patch(&self, id: &RecordId, patch: &RecordPatch) -> Result<()>;

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored document is
    /// inconsistent.
    async fn get(&self, id: &RecordId) -> Result<Option<SubmissionRecord>>;
}
