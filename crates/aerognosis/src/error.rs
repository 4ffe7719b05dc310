//! Error types for aerognosis.
//!
//! This module defines the crate-wide error type. Errors raised by the blob
//! uploader and the inference client have their own enums next to those
//! components and convert into [`Error`] when they need to cross a boundary.

use std::path::PathBuf;
use thiserror::Error;

use crate::blob::UploadError;
use crate::inference::InferenceError;
use crate::record::RecordStatus;

/// The main error type for aerognosis operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    /// A submission was rejected before any remote call was made.
    #[error("invalid submission: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A record id was not known to the record store.
    #[error("record not found: {id}")]
    RecordNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A stored record could not be turned back into a valid submission.
    #[error("corrupt record {id}: {message}")]
    CorruptRecord {
        /// The id of the offending record.
        id: String,
        /// What was inconsistent.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Pipeline Errors ===
    /// A status change that the submission state machine does not allow.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Status the record was in.
        from: RecordStatus,
        /// Status that was requested.
        to: RecordStatus,
    },

    /// The blob upload failed.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The inference request failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The caller cancelled the submission while a remote call was in flight.
    #[error("cancelled")]
    Cancelled,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for aerognosis operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a corrupt record error.
    #[must_use]
    pub fn corrupt_record(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Check if this error was raised by pre-flight validation.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error came from the record store.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::RecordNotFound { .. }
                | Self::CorruptRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = Error::validation("file is empty");
        assert_eq!(err.to_string(), "invalid submission: file is empty");
        assert!(err.is_validation());
        assert!(!err.is_storage_error());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("something went wrong");
        assert_eq!(err.to_string(), "internal error: something went wrong");
    }

    #[test]
    fn test_record_not_found_is_storage_error() {
        let err = Error::RecordNotFound {
            id: "17".to_string(),
        };
        assert!(err.is_storage_error());
        assert!(err.to_string().contains("17"));
    }

    #[test]
    fn test_corrupt_record_display() {
        let err = Error::corrupt_record("3", "completed without result");
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("completed without result"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidTransition {
            from: RecordStatus::Completed,
            to: RecordStatus::Analyzing,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition from completed to analyzing"
        );
    }

    #[test]
    fn test_upload_error_is_transparent() {
        let err: Error = UploadError::Backend {
            status: 507,
            message: "insufficient storage".to_string(),
        }
        .into();
        assert!(err.to_string().contains("insufficient storage"));
        assert!(matches!(err, Error::Upload(_)));
    }

    #[test]
    fn test_inference_error_is_transparent() {
        let err: Error = InferenceError::Status {
            status: 503,
            message: "service unavailable".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "service unavailable");
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(Error::Cancelled.to_string(), "cancelled");
        assert!(!Error::Cancelled.is_storage_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(err.is_storage_error());
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "chunk_size_bytes must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("chunk_size_bytes"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
