//! Inference service client.
//!
//! One POST per submission, carrying a reference to the uploaded image and
//! returning the raw JSON payload for the normalizer. The client never
//! retries and never times out on its own; wrap it in [`WithTimeout`] when a
//! deadline is wanted.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors raised while requesting an analysis.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The service answered with a non-success status.
    ///
    /// Displays as the bare message so it can be stored on the record.
    #[error("{message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body, or a generic one.
        message: String,
    },

    /// The request never produced a response.
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response whose body was not JSON.
    #[error("inference response was not valid JSON: {0}")]
    Decode(String),

    /// A success response that reported `"success": false`.
    #[error("{0}")]
    Rejected(String),

    /// The caller-imposed deadline passed.
    #[error("inference request timed out after {0:?}")]
    Timeout(Duration),
}

/// Body of the analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Durable URL of the uploaded image.
    pub image_reference: String,
    /// Path of the image inside blob storage.
    pub storage_path: String,
    /// Original file name.
    pub file_name: String,
    /// MIME type of the image.
    pub file_type: String,
    /// Identity of the submitter.
    pub submitted_by: String,
}

/// Trait for inference backends.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// Ask the service to analyse the referenced image.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    async fn request_analysis(&self, request: &AnalysisRequest) -> Result<Value, InferenceError>;
}

/// Default path of the analysis endpoint below the base URL.
pub const DEFAULT_ANALYZE_PATH: &str = "/analyze";

/// JSON-over-HTTP inference client.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    http: Client,
    endpoint: String,
}

impl HttpInferenceClient {
    /// Client for the service at `base_url`, posting to [`DEFAULT_ANALYZE_PATH`].
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self::with_path(Client::new(), base_url, DEFAULT_ANALYZE_PATH)
    }

    /// Client posting to `base_url` joined with `analyze_path`.
    #[must_use]
    pub fn with_path(http: Client, base_url: &str, analyze_path: &str) -> Self {
        let endpoint = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            analyze_path.trim_start_matches('/')
        );
        Self { http, endpoint }
    }

    /// Full URL requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn request_analysis(&self, request: &AnalysisRequest) -> Result<Value, InferenceError> {
        debug!("Requesting analysis of {}", request.image_reference);
        let response = self.http.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message: failure_message(status, &body),
            });
        }

        let payload: Value =
            serde_json::from_slice(&body).map_err(|e| InferenceError::Decode(e.to_string()))?;
        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            let message = error_message(&payload)
                .unwrap_or_else(|| "inference service reported failure".to_string());
            return Err(InferenceError::Rejected(message));
        }
        Ok(payload)
    }
}

/// Message for a non-success response: the body's error text if it has
/// one, else a generic line naming the status.
fn failure_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| format!("analysis failed with status {}", status.as_u16()))
}

/// Pull a human-readable error out of a JSON error body.
fn error_message(body: &Value) -> Option<String> {
    let text = |v: &Value| v.as_str().filter(|s| !s.trim().is_empty()).map(str::to_owned);
    ["error", "message", "detail"]
        .iter()
        .find_map(|key| body.get(key).and_then(text))
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(text)
        })
}

/// Caller-side deadline around another client.
#[derive(Debug, Clone)]
pub struct WithTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C> WithTimeout<C> {
    /// Fail requests to `inner` that take longer than `timeout`.
    #[must_use]
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl<C: InferenceClient> InferenceClient for WithTimeout<C> {
    async fn request_analysis(&self, request: &AnalysisRequest) -> Result<Value, InferenceError> {
        tokio::time::timeout(self.timeout, self.inner.request_analysis(request))
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout))?
    }
}
