//! Resumable HTTP blob backend.
//!
//! The protocol is the session style used by cloud object stores:
//!
//! 1. `POST {endpoint}/o?uploadType=resumable&name=PATH` announces the upload
//!    (`X-Upload-Content-Type`, `X-Upload-Content-Length`) and answers with the
//!    session URL in `Location`.
//! 2. Each chunk is `PUT` to the session URL with
//!    `Content-Range: bytes FIRST-LAST/TOTAL`. `308` means more is expected;
//!    its optional `Range: bytes=0-N` header says what was persisted, and the
//!    next chunk starts at `N + 1`. `200`/`201` finishes the upload.

use std::io::SeekFrom;

use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{BlobUploader, LocalFile, ProgressFn, ProgressTracker, UploadError, UploadReceipt};

/// Default chunk size; a multiple of 256 KiB as object stores require.
const DEFAULT_CHUNK_SIZE: usize = 8 * 256 * 1024;

/// Status code object stores use for "resume incomplete".
const RESUME_INCOMPLETE: u16 = 308;

const UPLOAD_CONTENT_TYPE: &str = "X-Upload-Content-Type";
const UPLOAD_CONTENT_LENGTH: &str = "X-Upload-Content-Length";

/// Uploads blobs over HTTP in resumable chunks.
#[derive(Debug, Clone)]
pub struct HttpBlobUploader {
    http: Client,
    endpoint: String,
    public_base_url: Option<String>,
    chunk_size: usize,
}

impl HttpBlobUploader {
    /// Upload to the object store rooted at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            public_base_url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Base URL used when the backend does not report a download URL.
    #[must_use]
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into());
        self
    }

    /// Set the chunk size. Zero is treated as one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    async fn start_session(&self, file: &LocalFile, destination: &str) -> Result<String, UploadError> {
        let response = self
            .http
            .post(format!("{}/o", self.endpoint))
            .query(&[("uploadType", "resumable"), ("name", destination)])
            .header(UPLOAD_CONTENT_TYPE, file.mime_type())
            .header(UPLOAD_CONTENT_LENGTH, file.size_bytes().to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| UploadError::Protocol("session response has no Location header".to_string()))?;
        let session = response
            .url()
            .join(location)
            .map_err(|e| UploadError::Protocol(format!("invalid session URL {location:?}: {e}")))?;
        Ok(session.to_string())
    }

    async fn put_chunk(
        &self,
        session: &str,
        range: String,
        body: Vec<u8>,
    ) -> Result<Response, UploadError> {
        Ok(self
            .http
            .put(session)
            .header(CONTENT_RANGE, range)
            .body(body)
            .send()
            .await?)
    }

    async fn finish(&self, response: Response, destination: &str) -> Result<String, UploadError> {
        let body = response.bytes().await?;
        let reported = serde_json::from_slice::<Value>(&body).ok().and_then(|json| {
            ["url", "mediaLink"]
                .iter()
                .find_map(|key| json.get(key).and_then(Value::as_str).map(str::to_owned))
        });
        Ok(reported.unwrap_or_else(|| match &self.public_base_url {
            Some(base) => format!("{}/{destination}", base.trim_end_matches('/')),
            None => format!("{}/o/{destination}", self.endpoint),
        }))
    }
}

#[async_trait::async_trait]
impl BlobUploader for HttpBlobUploader {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn upload(
        &self,
        file: &LocalFile,
        destination: &str,
        on_progress: &ProgressFn,
    ) -> Result<UploadReceipt, UploadError> {
        let total = file.size_bytes();
        let session = self.start_session(file, destination).await?;
        debug!("Opened upload session for {} ({} bytes)", destination, total);

        if total == 0 {
            let response = self.put_chunk(&session, "bytes */0".to_string(), Vec::new()).await?;
            if !response.status().is_success() {
                return Err(backend_error(response).await);
            }
            let url = self.finish(response, destination).await?;
            return Ok(UploadReceipt {
                url,
                size_bytes: 0,
                checksum: None,
            });
        }

        let mut reader = file.reader().await?;
        let mut tracker = ProgressTracker::new(total, on_progress);
        let mut offset: u64 = 0;
        tracker.advance(0);

        loop {
            reader.seek(SeekFrom::Start(offset)).await?;
            let mut chunk = Vec::with_capacity(self.chunk_size);
            (&mut reader)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .await?;
            if chunk.is_empty() {
                return Err(UploadError::SizeMismatch {
                    expected: total,
                    actual: offset,
                });
            }

            let last = offset + chunk.len() as u64 - 1;
            let response = self
                .put_chunk(&session, format!("bytes {offset}-{last}/{total}"), chunk)
                .await?;
            let status = response.status();

            if status == StatusCode::OK || status == StatusCode::CREATED {
                tracker.advance(total);
                let url = self.finish(response, destination).await?;
                return Ok(UploadReceipt {
                    url,
                    size_bytes: total,
                    checksum: None,
                });
            }
            if status.as_u16() != RESUME_INCOMPLETE {
                return Err(backend_error(response).await);
            }

            let persisted = persisted_bytes(&response)?;
            if persisted <= offset {
                return Err(UploadError::Protocol(format!(
                    "backend persisted nothing beyond byte {offset}"
                )));
            }
            if persisted >= total {
                return Err(UploadError::Protocol(
                    "backend holds every byte but did not finalize the upload".to_string(),
                ));
            }
            debug!("Backend persisted {}/{} bytes", persisted, total);
            tracker.advance(persisted);
            offset = persisted;
        }
    }
}

/// Number of bytes the backend reports as persisted in a `308` response.
fn persisted_bytes(response: &Response) -> Result<u64, UploadError> {
    let end = response
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_end);
    match end {
        None => Ok(0),
        Some(end) => end.checked_add(1).ok_or_else(|| {
            UploadError::Protocol(format!("backend reported an impossible range end {end}"))
        }),
    }
}

/// Parse the inclusive end of a `bytes=0-N` header value.
fn parse_range_end(value: &str) -> Option<u64> {
    let (_, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse().ok()
}

async fn backend_error(response: Response) -> UploadError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        body.trim().to_string()
    };
    UploadError::Backend {
        status: status.as_u16(),
        message,
    }
}
