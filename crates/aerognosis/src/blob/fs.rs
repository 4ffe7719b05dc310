//! Filesystem blob backend.

use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{BlobUploader, LocalFile, ProgressFn, ProgressTracker, UploadError, UploadReceipt};

/// Default copy buffer size.
const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Stores blobs below a root directory.
///
/// Bytes are streamed into a hidden temp file next to the destination, hashed
/// with BLAKE3 while copying, and renamed into place once complete. A failed
/// upload may leave the temp file behind.
#[derive(Debug, Clone)]
pub struct FsBlobUploader {
    root: PathBuf,
    public_base_url: Option<String>,
    chunk_size: usize,
}

impl FsBlobUploader {
    /// Store blobs below `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Serve blobs from `base_url/path` instead of `file://` URLs.
    #[must_use]
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into());
        self
    }

    /// Set the copy buffer size. Zero is treated as one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, destination: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(destination);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if destination.is_empty() || !plain {
            return Err(UploadError::InvalidPath(destination.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, destination: &str, stored: &Path) -> Result<String, UploadError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{destination}", base.trim_end_matches('/')));
        }
        let absolute = std::path::absolute(stored)?;
        Ok(format!("file://{}", absolute.display()))
    }
}

#[async_trait::async_trait]
impl BlobUploader for FsBlobUploader {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn upload(
        &self,
        file: &LocalFile,
        destination: &str,
        on_progress: &ProgressFn,
    ) -> Result<UploadReceipt, UploadError> {
        let target = self.resolve(destination)?;
        let parent = target
            .parent()
            .ok_or_else(|| UploadError::InvalidPath(destination.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial = parent.join(format!(".{file_name}.partial"));

        let mut reader = file.reader().await?;
        let mut out = tokio::fs::File::create(&partial).await?;
        let mut hasher = blake3::Hasher::new();
        let mut tracker = ProgressTracker::new(file.size_bytes(), on_progress);
        let mut buf = vec![0u8; self.chunk_size];
        let mut transferred: u64 = 0;

        tracker.advance(0);
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            transferred += n as u64;
            tracker.advance(transferred);
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        if transferred != file.size_bytes() {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(UploadError::SizeMismatch {
                expected: file.size_bytes(),
                actual: transferred,
            });
        }

        tokio::fs::rename(&partial, &target).await?;
        let checksum = hasher.finalize().to_hex().to_string();
        debug!(
            "Stored {} bytes at {} (blake3 {})",
            transferred,
            target.display(),
            &checksum[..16]
        );

        Ok(UploadReceipt {
            url: self.url_for(destination, &target)?,
            size_bytes: transferred,
            checksum: Some(checksum),
        })
    }
}
