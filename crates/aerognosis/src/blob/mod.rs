//! Blob upload abstraction.
//!
//! A [`BlobUploader`] moves the bytes of a [`LocalFile`] to durable storage
//! under a caller-chosen path and reports progress as an integer percentage.
//! Two backends are provided: [`FsBlobUploader`] writes into a local
//! directory, [`HttpBlobUploader`] speaks a resumable session protocol.

mod fs;
mod http;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::record::{Identity, RecordId, SourceFile};

pub use fs::FsBlobUploader;
pub use http::HttpBlobUploader;

/// MIME type used when the extension is not recognised.
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Progress callback; receives percentages in `[0, 100]`.
pub type ProgressFn = dyn Fn(u8) + Send + Sync;

/// Errors raised while uploading a blob.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Reading the source or writing the destination failed.
    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP transport failed.
    #[error("upload transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The storage backend answered with an error status.
    #[error("storage backend returned {status}: {message}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Body or reason phrase.
        message: String,
    },

    /// The storage backend broke the upload protocol.
    #[error("storage protocol error: {0}")]
    Protocol(String),

    /// The destination path is unusable.
    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    /// The source yielded a different number of bytes than announced.
    #[error("size mismatch: expected {expected} bytes, transferred {actual}")]
    SizeMismatch {
        /// Size recorded when the file was opened.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },
}

/// What a successful upload resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Durable, fetchable URL.
    pub url: String,
    /// Bytes transferred.
    pub size_bytes: u64,
    /// BLAKE3 hex digest, when the backend computed one.
    pub checksum: Option<String>,
}

/// Trait for blob storage backends.
#[async_trait::async_trait]
pub trait BlobUploader: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Upload `file` to `destination`.
    ///
    /// `on_progress` receives non-decreasing percentages and is never called
    /// for a zero-length file.
    ///
    /// # Errors
    ///
    /// Returns the underlying transport or backend error unmodified.
    async fn upload(
        &self,
        file: &LocalFile,
        destination: &str,
        on_progress: &ProgressFn,
    ) -> Result<UploadReceipt, UploadError>;
}

/// Seekable byte source handed to uploaders.
pub trait FileReader: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> FileReader for T {}

#[derive(Clone)]
enum FileSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
        }
    }
}

/// A locally selected file, ready to be submitted.
#[derive(Debug, Clone)]
pub struct LocalFile {
    name: String,
    mime_type: String,
    size_bytes: u64,
    source: FileSource,
}

impl LocalFile {
    /// Open a file on disk, capturing its name, size and MIME type.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be inspected or is not a regular file.
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(crate::Error::validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| crate::Error::validation(format!("{} has no file name", path.display())))?;
        Ok(Self {
            mime_type: mime_type_for(&name).to_string(),
            name,
            size_bytes: meta.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Wrap bytes already in memory.
    #[must_use]
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into().into();
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            source: FileSource::Memory(bytes),
        }
    }

    /// Override the detected MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// File name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Size in bytes as observed when the file was opened.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Check if the file has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// The metadata stored on the submission record.
    #[must_use]
    pub fn source_file(&self) -> SourceFile {
        SourceFile {
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
        }
    }

    /// Open a fresh reader positioned at the start of the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened.
    pub async fn reader(&self) -> std::io::Result<Box<dyn FileReader>> {
        match &self.source {
            FileSource::Path(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
            FileSource::Memory(bytes) => Ok(Box::new(std::io::Cursor::new(Arc::clone(bytes)))),
        }
    }
}

/// Guess a MIME type from a file name's extension.
#[must_use]
pub fn mime_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("gif") => "image/gif",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// Build the `submitter/record/file` destination path for a submission.
///
/// Path separators inside a segment are replaced with `_`.
///
/// # Errors
///
/// Returns [`UploadError::InvalidPath`] if a segment is empty, `.` or `..`.
pub fn blob_path(
    submitter: &Identity,
    record: &RecordId,
    file_name: &str,
) -> Result<String, UploadError> {
    let segments = [submitter.as_str(), record.as_str(), file_name]
        .into_iter()
        .map(sanitize_segment)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(segments.join("/"))
}

fn sanitize_segment(segment: &str) -> Result<String, UploadError> {
    let cleaned = segment.trim().replace(['/', '\\'], "_");
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(UploadError::InvalidPath(format!(
            "unusable path segment {segment:?}"
        )));
    }
    Ok(cleaned)
}

/// Turns transferred byte counts into monotonically non-decreasing
/// percentages and forwards only changes to the callback.
pub struct ProgressTracker<'a> {
    total: u64,
    last: Option<u8>,
    sink: &'a ProgressFn,
}

impl fmt::Debug for ProgressTracker<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total", &self.total)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl<'a> ProgressTracker<'a> {
    /// Track a transfer of `total` bytes.
    #[must_use]
    pub fn new(total: u64, sink: &'a ProgressFn) -> Self {
        Self {
            total,
            last: None,
            sink,
        }
    }

    /// Record that `transferred` bytes are done. Values beyond `total` are
    /// clamped, values below the last reported percentage are ignored.
    pub fn advance(&mut self, transferred: u64) {
        if self.total == 0 {
            return;
        }
        let done = u128::from(transferred.min(self.total));
        let pct = u8::try_from(done * 100 / u128::from(self.total)).unwrap_or(100);
        if self.last.map_or(true, |last| pct > last) {
            self.last = Some(pct);
            (self.sink)(pct);
        }
    }

    /// The last percentage forwarded, if any.
    #[must_use]
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
