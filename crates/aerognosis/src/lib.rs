//! `aerognosis` - Aircraft inspection image analysis submissions
//!
//! This library drives a single inspection image through upload to blob
//! storage, a request to a remote inference service, and normalization of
//! whatever that service returns, keeping a durable record of each step.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod logging;
pub mod pipeline;
pub mod record;
pub mod store;

pub use analysis::{normalize, AnalysisResult, Finding, Measurements};
pub use blob::{BlobUploader, FsBlobUploader, HttpBlobUploader, LocalFile, UploadError};
pub use config::Config;
pub use error::{Error, Result};
pub use inference::{AnalysisRequest, HttpInferenceClient, InferenceClient, InferenceError};
pub use logging::init_logging;
pub use pipeline::{CancelHandle, Pipeline, SubmitOptions};
pub use record::{
    Identity, RecordId, RecordStatus, SourceFile, StorageRef, SubmissionRecord, SubmissionState,
};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
