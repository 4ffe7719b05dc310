//! Submission record types.
//!
//! A [`SubmissionRecord`] is the persisted ledger entry for one analysis
//! request. Its status is a closed [`SubmissionState`] whose variants carry
//! exactly the fields that are valid for that status, so a completed record
//! without a result (or a failed record without an error) cannot be built.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisResult;
use crate::error::{Error, Result};

/// Opaque record identifier assigned by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap a store-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to the principal that submitted an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create an identity reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the reference is empty or whitespace.
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(Error::validation("identity must not be empty"));
        }
        Ok(Self(reference))
    }

    /// Borrow the identity reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata about the local file that was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    /// File name as selected by the user.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
}

/// Where the uploaded bytes live in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    /// Path inside the blob store (`submitter/record/file`).
    pub path: String,
    /// Durable, fetchable URL of the blob.
    pub url: String,
    /// BLAKE3 hex digest of the uploaded bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// The status of a submission, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    /// The record exists and bytes are being transferred.
    Uploading,
    /// Bytes are durable; inference not yet requested.
    Uploaded,
    /// The inference service has been asked to analyse the image.
    Analyzing,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    AnalysisFailed,
}

impl RecordStatus {
    /// The wire representation of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::AnalysisFailed => "analysis-failed",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::AnalysisFailed)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "uploaded" => Ok(Self::Uploaded),
            "analyzing" => Ok(Self::Analyzing),
            "completed" => Ok(Self::Completed),
            "analysis-failed" => Ok(Self::AnalysisFailed),
            other => Err(Error::internal(format!("unknown record status: {other}"))),
        }
    }
}

/// Status together with the fields that are only valid in that status.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionState {
    /// Bytes are being transferred.
    Uploading,
    /// Bytes are durable.
    Uploaded {
        /// Location of the uploaded blob.
        storage: StorageRef,
    },
    /// Inference has been requested.
    Analyzing {
        /// Location of the uploaded blob.
        storage: StorageRef,
    },
    /// Analysis finished and was normalized.
    Completed {
        /// Location of the uploaded blob.
        storage: StorageRef,
        /// The normalized analysis.
        result: AnalysisResult,
    },
    /// Some stage failed.
    AnalysisFailed {
        /// Location of the blob, if the upload finished before the failure.
        storage: Option<StorageRef>,
        /// Human-readable failure reason.
        error: String,
    },
}

impl SubmissionState {
    /// The bare status of this state.
    #[must_use]
    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Uploading => RecordStatus::Uploading,
            Self::Uploaded { .. } => RecordStatus::Uploaded,
            Self::Analyzing { .. } => RecordStatus::Analyzing,
            Self::Completed { .. } => RecordStatus::Completed,
            Self::AnalysisFailed { .. } => RecordStatus::AnalysisFailed,
        }
    }

    /// The storage reference, if one has been assigned.
    #[must_use]
    pub fn storage(&self) -> Option<&StorageRef> {
        match self {
            Self::Uploading => None,
            Self::Uploaded { storage }
            | Self::Analyzing { storage }
            | Self::Completed { storage, .. } => Some(storage),
            Self::AnalysisFailed { storage, .. } => storage.as_ref(),
        }
    }

    /// The analysis result; only present when completed.
    #[must_use]
    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            Self::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    /// The failure message; only present when failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::AnalysisFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Rebuild a state from its flattened document fields.
    ///
    /// # Errors
    ///
    /// Returns a message describing which field is missing for the status.
    pub fn from_parts(
        status: RecordStatus,
        storage: Option<StorageRef>,
        result: Option<AnalysisResult>,
        error: Option<String>,
    ) -> std::result::Result<Self, String> {
        let state = match status {
            RecordStatus::Uploading => Self::Uploading,
            RecordStatus::Uploaded => Self::Uploaded {
                storage: storage.ok_or("uploaded record has no storage reference")?,
            },
            RecordStatus::Analyzing => Self::Analyzing {
                storage: storage.ok_or("analyzing record has no storage reference")?,
            },
            RecordStatus::Completed => Self::Completed {
                storage: storage.ok_or("completed record has no storage reference")?,
                result: result.ok_or("completed record has no result")?,
            },
            RecordStatus::AnalysisFailed => Self::AnalysisFailed {
                storage,
                error: error.ok_or("failed record has no error")?,
            },
        };
        Ok(state)
    }
}

/// Audit timestamps. Each is assigned by the orchestrator at a transition
/// and never moves backwards relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamps {
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last patched.
    pub updated_at: DateTime<Utc>,
    /// When the upload finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    /// When inference was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_requested_at: Option<DateTime<Utc>>,
    /// When a result was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_completed_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// Timestamps for a record created at `at`.
    #[must_use]
    pub fn created(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: at,
            uploaded_at: None,
            analysis_requested_at: None,
            analysis_completed_at: None,
        }
    }
}

/// The document handed to the record store on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// The submitted file.
    pub source_file: SourceFile,
    /// Who submitted it.
    pub submitted_by: Identity,
    /// Creation time; also the initial `updated_at`.
    pub created_at: DateTime<Utc>,
}

/// The partial document written on every transition.
///
/// A patch always carries the complete state so that status, storage
/// reference, result and error are replaced together.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    /// The new state.
    pub state: SubmissionState,
    /// New `updated_at`.
    pub updated_at: DateTime<Utc>,
    /// Set once, by the `uploaded` transition.
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Set once, by the `analyzing` transition.
    pub analysis_requested_at: Option<DateTime<Utc>>,
    /// Set once, by the `completed` transition.
    pub analysis_completed_at: Option<DateTime<Utc>>,
}

/// One user-initiated analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordDocument", try_from = "RecordDocument")]
pub struct SubmissionRecord {
    /// Store-assigned id.
    pub id: RecordId,
    /// The submitted file.
    pub source_file: SourceFile,
    /// Who submitted it.
    pub submitted_by: Identity,
    /// Current status and its payload.
    pub state: SubmissionState,
    /// Audit timestamps.
    pub timestamps: Timestamps,
}

impl SubmissionRecord {
    /// Build the in-memory record for a freshly created store document.
    #[must_use]
    pub fn created(id: RecordId, new: NewRecord) -> Self {
        Self {
            id,
            source_file: new.source_file,
            submitted_by: new.submitted_by,
            state: SubmissionState::Uploading,
            timestamps: Timestamps::created(new.created_at),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.state.status()
    }

    /// Storage reference, once the upload has finished.
    #[must_use]
    pub fn storage_ref(&self) -> Option<&StorageRef> {
        self.state.storage()
    }

    /// Analysis result, only when completed.
    #[must_use]
    pub fn result(&self) -> Option<&AnalysisResult> {
        self.state.result()
    }

    /// Failure message, only when failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.state.error()
    }

    /// `uploading -> uploaded`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other status.
    pub fn mark_uploaded(&mut self, storage: StorageRef) -> Result<()> {
        self.ensure_status(RecordStatus::Uploading, RecordStatus::Uploaded)?;
        let at = self.next_timestamp();
        self.state = SubmissionState::Uploaded { storage };
        self.timestamps.uploaded_at = Some(at);
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// `uploaded -> analyzing`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other status.
    pub fn mark_analyzing(&mut self) -> Result<()> {
        let SubmissionState::Uploaded { storage } = &self.state else {
            return Err(self.invalid(RecordStatus::Analyzing));
        };
        let storage = storage.clone();
        let at = self.next_timestamp();
        self.state = SubmissionState::Analyzing { storage };
        self.timestamps.analysis_requested_at = Some(at);
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// `analyzing -> completed`. Clears any previous error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] from any other status.
    pub fn complete(&mut self, result: AnalysisResult) -> Result<()> {
        let SubmissionState::Analyzing { storage } = &self.state else {
            return Err(self.invalid(RecordStatus::Completed));
        };
        let storage = storage.clone();
        let at = self.next_timestamp();
        self.state = SubmissionState::Completed { storage, result };
        self.timestamps.analysis_completed_at = Some(at);
        self.timestamps.updated_at = at;
        Ok(())
    }

    /// Any non-terminal status `-> analysis-failed`. The storage reference,
    /// if any, is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the record is already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        if self.status().is_terminal() {
            return Err(self.invalid(RecordStatus::AnalysisFailed));
        }
        let storage = self.state.storage().cloned();
        self.timestamps.updated_at = self.next_timestamp();
        self.state = SubmissionState::AnalysisFailed {
            storage,
            error: error.into(),
        };
        Ok(())
    }

    /// The patch that brings a store document in line with this record.
    #[must_use]
    pub fn to_patch(&self) -> RecordPatch {
        RecordPatch {
            state: self.state.clone(),
            updated_at: self.timestamps.updated_at,
            uploaded_at: self.timestamps.uploaded_at,
            analysis_requested_at: self.timestamps.analysis_requested_at,
            analysis_completed_at: self.timestamps.analysis_completed_at,
        }
    }

    /// Apply a patch produced by [`SubmissionRecord::to_patch`].
    ///
    /// Timestamps that are already set are never cleared.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        self.state = patch.state.clone();
        self.timestamps.updated_at = patch.updated_at;
        self.timestamps.uploaded_at = patch.uploaded_at.or(self.timestamps.uploaded_at);
        self.timestamps.analysis_requested_at = patch
            .analysis_requested_at
            .or(self.timestamps.analysis_requested_at);
        self.timestamps.analysis_completed_at = patch
            .analysis_completed_at
            .or(self.timestamps.analysis_completed_at);
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        Utc::now().max(self.timestamps.updated_at)
    }

    fn ensure_status(&self, expected: RecordStatus, to: RecordStatus) -> Result<()> {
        if self.status() == expected {
            Ok(())
        } else {
            Err(self.invalid(to))
        }
    }

    fn invalid(&self, to: RecordStatus) -> Error {
        Error::InvalidTransition {
            from: self.status(),
            to,
        }
    }
}

/// Flat document form of a [`SubmissionRecord`], as seen by subscribers
/// and the `--json` output of the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDocument {
    /// Record id.
    pub id: RecordId,
    /// Status string.
    pub status: RecordStatus,
    /// Submitted file.
    pub source_file: SourceFile,
    /// Blob location.
    pub storage_ref: Option<StorageRef>,
    /// Submitting principal.
    pub submitted_by: Identity,
    /// Normalized result.
    pub result: Option<AnalysisResult>,
    /// Failure message.
    pub error: Option<String>,
    /// Audit timestamps.
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl From<SubmissionRecord> for RecordDocument {
    fn from(record: SubmissionRecord) -> Self {
        let status = record.status();
        let (storage_ref, result, error) = match record.state {
            SubmissionState::Uploading => (None, None, None),
            SubmissionState::Uploaded { storage } | SubmissionState::Analyzing { storage } => {
                (Some(storage), None, None)
            }
            SubmissionState::Completed { storage, result } => (Some(storage), Some(result), None),
            SubmissionState::AnalysisFailed { storage, error } => (storage, None, Some(error)),
        };
        Self {
            id: record.id,
            status,
            source_file: record.source_file,
            storage_ref,
            submitted_by: record.submitted_by,
            result,
            error,
            timestamps: record.timestamps,
        }
    }
}

impl TryFrom<RecordDocument> for SubmissionRecord {
    type Error = Error;

    fn try_from(doc: RecordDocument) -> Result<Self> {
        let state = SubmissionState::from_parts(doc.status, doc.storage_ref, doc.result, doc.error)
            .map_err(|message| Error::corrupt_record(doc.id.as_str(), message))?;
        Ok(Self {
            id: doc.id,
            source_file: doc.source_file,
            submitted_by: doc.submitted_by,
            state,
            timestamps: doc.timestamps,
        })
    }
}
