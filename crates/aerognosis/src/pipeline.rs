//! Submission pipeline.
//!
//! Drives one image from the caller's disk to a terminal record:
//!
//! ```text
//! uploading -> uploaded -> analyzing -> completed
//!     \___________\____________\______> analysis-failed
//! ```
//!
//! Stages run strictly in sequence and every status write is awaited before
//! the next stage starts. The in-memory record only ever reflects states that
//! the store accepted.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::analysis::normalize;
use crate::blob::{
    blob_path, BlobUploader, FsBlobUploader, HttpBlobUploader, LocalFile, ProgressFn,
};
use crate::config::{BlobBackend, Config};
use crate::error::{Error, Result};
use crate::inference::{AnalysisRequest, HttpInferenceClient, InferenceClient, WithTimeout};
use crate::record::{Identity, NewRecord, StorageRef, SubmissionRecord};
use crate::store::RecordStore;

/// Cancels an in-flight submission.
///
/// Clones share the same signal. Cancelling abandons the remote call that is
/// currently running; the record is still finalized as failed.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelSignal>,
}

#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    /// A handle that has not been triggered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been signalled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-call options for [`Pipeline::submit_with`].
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Receives upload progress percentages.
    pub progress: Option<Arc<ProgressFn>>,
    /// Abandons the submission when triggered.
    pub cancel: Option<CancelHandle>,
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Orchestrates record store, blob uploader and inference client.
///
/// Cheap to clone; concurrent submissions share the collaborators and
/// nothing else.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    uploader: Arc<dyn BlobUploader>,
    inference: Arc<dyn InferenceClient>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store.name())
            .field("uploader", &self.uploader.name())
            .finish_non_exhaustive()
    }
}

fn ignore_progress(_: u8) {}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        uploader: Arc<dyn BlobUploader>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            store,
            uploader,
            inference,
        }
    }

    /// Build the configured uploader and inference client around `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if the HTTP blob backend has no
    /// endpoint.
    pub fn from_config(config: &Config, store: Arc<dyn RecordStore>) -> Result<Self> {
        let blob = &config.blob;
        let uploader: Arc<dyn BlobUploader> = match blob.backend {
            BlobBackend::Fs => {
                let mut fs = FsBlobUploader::new(config.blob_root())
                    .with_chunk_size(blob.chunk_size_bytes);
                if let Some(base) = &blob.public_base_url {
                    fs = fs.with_public_base_url(base.clone());
                }
                Arc::new(fs)
            }
            BlobBackend::Http => {
                let endpoint = blob.endpoint.clone().ok_or_else(|| Error::ConfigValidation {
                    message: "blob.endpoint is required for the http backend".to_string(),
                })?;
                let mut http = HttpBlobUploader::new(endpoint).with_chunk_size(blob.chunk_size_bytes);
                if let Some(base) = &blob.public_base_url {
                    http = http.with_public_base_url(base.clone());
                }
                Arc::new(http)
            }
        };

        let client = HttpInferenceClient::with_path(
            reqwest::Client::new(),
            &config.inference.base_url,
            &config.inference.analyze_path,
        );
        debug!("Inference endpoint is {}", client.endpoint());
        let inference: Arc<dyn InferenceClient> = match config.inference_timeout() {
            Some(timeout) => Arc::new(WithTimeout::new(client, timeout)),
            None => Arc::new(client),
        };

        Ok(Self::new(store, uploader, inference))
    }

    /// The record store submissions are written to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Submit `file` on behalf of `identity` with default options.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::submit_with`].
    pub async fn submit(&self, file: &LocalFile, identity: &Identity) -> Result<SubmissionRecord> {
        self.submit_with(file, identity, &SubmitOptions::default())
            .await
    }

    /// Submit `file` on behalf of `identity`.
    ///
    /// Upload and inference failures do not surface as `Err`: the record is
    /// finalized as `analysis-failed` and returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty file, before anything is
    /// written. Returns a store error if the record cannot be created, or if
    /// a failed submission cannot be finalized.
    pub async fn submit_with(
        &self,
        file: &LocalFile,
        identity: &Identity,
        options: &SubmitOptions,
    ) -> Result<SubmissionRecord> {
        if file.is_empty() {
            return Err(Error::validation(format!("{} is empty", file.name())));
        }

        let new = NewRecord {
            source_file: file.source_file(),
            submitted_by: identity.clone(),
            created_at: Utc::now(),
        };
        let id = self.store.create(&new).await?;
        let mut record = SubmissionRecord::created(id, new);
        info!(
            "Submission {} created for {} by {}",
            record.id, record.source_file.name, record.submitted_by
        );

        match self.run(&mut record, file, options).await {
            Ok(()) => {
                info!("Submission {} completed", record.id);
                Ok(record)
            }
            Err(failure) => self.finalize_failed(record, &failure).await,
        }
    }

    async fn run(
        &self,
        record: &mut SubmissionRecord,
        file: &LocalFile,
        options: &SubmitOptions,
    ) -> Result<()> {
        let cancel = options.cancel.as_ref();
        let progress: &ProgressFn = options.progress.as_deref().unwrap_or(&ignore_progress);

        let destination = blob_path(&record.submitted_by, &record.id, &record.source_file.name)?;
        debug!(
            "Uploading submission {} to {} via {}",
            record.id,
            destination,
            self.uploader.name()
        );
        let receipt = guarded(cancel, async {
            self.uploader
                .upload(file, &destination, progress)
                .await
                .map_err(Error::from)
        })
        .await?;
        let storage = StorageRef {
            path: destination,
            url: receipt.url,
            checksum: receipt.checksum,
        };
        self.commit(record, |r| r.mark_uploaded(storage)).await?;

        self.commit(record, SubmissionRecord::mark_analyzing).await?;
        let request = analysis_request(record)?;
        let payload = guarded(cancel, async {
            self.inference
                .request_analysis(&request)
                .await
                .map_err(Error::from)
        })
        .await?;

        let result = normalize(&payload);
        debug!(
            "Submission {} analysis normalized with {} findings",
            record.id,
            result.findings.len()
        );
        self.commit(record, |r| r.complete(result)).await
    }

    /// Apply `transition` to a copy, persist it, then adopt it.
    async fn commit<F>(&self, record: &mut SubmissionRecord, transition: F) -> Result<()>
    where
        F: FnOnce(&mut SubmissionRecord) -> Result<()> + Send,
    {
        let mut next = record.clone();
        transition(&mut next)?;
        self.store.patch(&next.id, &next.to_patch()).await?;
        info!("Submission {} is now {}", next.id, next.status());
        *record = next;
        Ok(())
    }

    async fn finalize_failed(
        &self,
        mut record: SubmissionRecord,
        failure: &Error,
    ) -> Result<SubmissionRecord> {
        let message = failure.to_string();
        warn!(
            "Submission {} failed while {}: {}",
            record.id,
            record.status(),
            message
        );

        record.fail(message)?;
        if let Err(e) = self.store.patch(&record.id, &record.to_patch()).await {
            error!("Could not mark submission {} as failed: {}", record.id, e);
            return Err(e);
        }
        info!("Submission {} is now {}", record.id, record.status());
        Ok(record)
    }
}

fn analysis_request(record: &SubmissionRecord) -> Result<AnalysisRequest> {
    let storage = record
        .storage_ref()
        .ok_or_else(|| Error::internal("analysis requested before upload finished"))?;
    Ok(AnalysisRequest {
        image_reference: storage.url.clone(),
        storage_path: storage.path.clone(),
        file_name: record.source_file.name.clone(),
        file_type: record.source_file.mime_type.clone(),
        submitted_by: record.submitted_by.to_string(),
    })
}

/// Race `call` against the cancel signal, if any.
async fn guarded<T, F>(cancel: Option<&CancelHandle>, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match cancel {
        None => call.await,
        Some(handle) => tokio::select! {
            biased;
            () = handle.cancelled() => Err(Error::Cancelled),
            outcome = call => outcome,
        },
    }
}
