//! End-to-end submissions against a mocked inference service.
//!
//! Blobs go to a temporary directory or a mocked resumable endpoint; records
//! go to a real `SQLite` ledger on disk.

use std::sync::Arc;
use std::time::Duration;

use aerognosis::inference::WithTimeout;
use aerognosis::{
    FsBlobUploader, HttpBlobUploader, HttpInferenceClient, Identity, LocalFile, Pipeline,
    RecordStatus, RecordStore, SqliteRecordStore,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    dir: TempDir,
    store: Arc<SqliteRecordStore>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            SqliteRecordStore::open(dir.path().join("ledger.db")).expect("open ledger"),
        );
        Self { dir, store }
    }

    async fn image(&self, name: &str, bytes: &[u8]) -> LocalFile {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("write image");
        LocalFile::open(&path).await.expect("open image")
    }

    fn fs_pipeline(&self, inference_uri: &str) -> Pipeline {
        let uploader = FsBlobUploader::new(self.dir.path().join("blobs"))
            .with_public_base_url("https://store");
        Pipeline::new(
            self.store.clone(),
            Arc::new(uploader),
            Arc::new(HttpInferenceClient::new(inference_uri)),
        )
    }
}

fn user() -> Identity {
    Identity::new("user-42").unwrap()
}

#[tokio::test]
async fn wing_crack_submission_completes() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .and(body_json(json!({
            "imageReference": "https://store/user-42/1/wing-crack.jpg",
            "storagePath": "user-42/1/wing-crack.jpg",
            "fileName": "wing-crack.jpg",
            "fileType": "image/jpeg",
            "submittedBy": "user-42"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "analysis": {
                "id": "a1",
                "summary": "minor crack",
                "metrics": {"confidence": 0.82, "score": 0.3},
                "findings": [{"area": "left wing", "severity": "low"}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = vec![0xFF; 2_048_000];
    let image = fixture.image("wing-crack.jpg", &bytes).await;
    let record = fixture
        .fs_pipeline(&server.uri())
        .submit(&image, &user())
        .await
        .unwrap();

    assert_eq!(record.status(), RecordStatus::Completed);
    assert!(record.error().is_none());
    let storage = record.storage_ref().unwrap();
    assert_eq!(storage.url, "https://store/user-42/1/wing-crack.jpg");
    assert_eq!(
        storage.checksum.as_deref(),
        Some(blake3::hash(&bytes).to_hex().as_str())
    );
    assert_eq!(record.source_file.size_bytes, 2_048_000);
    assert_eq!(record.source_file.mime_type, "image/jpeg");

    let result = record.result().unwrap();
    assert_eq!(result.id.as_deref(), Some("a1"));
    assert_eq!(result.summary.as_deref(), Some("minor crack"));
    assert_eq!(result.confidence, Some(0.82));
    assert_eq!(result.score, Some(0.3));
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].area.as_deref(), Some("left wing"));
    assert_eq!(result.findings[0].severity.as_deref(), Some("low"));

    let stored = std::fs::read(fixture.dir.path().join("blobs/user-42/1/wing-crack.jpg")).unwrap();
    assert_eq!(stored.len(), 2_048_000);

    let persisted = fixture.store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(persisted, record);
}

#[tokio::test]
async fn service_unavailable_marks_submission_failed() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"error": "service unavailable"})))
        .expect(1)
        .mount(&server)
        .await;

    let image = fixture.image("wing-crack.jpg", &[1; 512]).await;
    let record = fixture
        .fs_pipeline(&server.uri())
        .submit(&image, &user())
        .await
        .unwrap();

    assert_eq!(record.status(), RecordStatus::AnalysisFailed);
    assert_eq!(record.error(), Some("service unavailable"));
    assert!(record.result().is_none());
    assert!(record.storage_ref().is_some());

    let persisted = fixture.store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(persisted.status(), RecordStatus::AnalysisFailed);
    assert_eq!(persisted.error(), Some("service unavailable"));
    assert!(persisted.timestamps.analysis_requested_at.is_some());
    assert!(persisted.timestamps.analysis_completed_at.is_none());
}

#[tokio::test]
async fn unexpected_response_shape_completes_with_empty_result() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"analysis": "not an object"})))
        .mount(&server)
        .await;

    let image = fixture.image("panel.png", &[3; 64]).await;
    let record = fixture
        .fs_pipeline(&server.uri())
        .submit(&image, &user())
        .await
        .unwrap();

    assert_eq!(record.status(), RecordStatus::Completed);
    let result = record.result().unwrap();
    assert!(result.summary.is_none());
    assert!(result.findings.is_empty());
}

#[tokio::test]
async fn resumable_http_upload_then_segmentation_analysis() {
    let fixture = Fixture::new();
    let blobs = MockServer::start().await;
    let inference = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/o"))
        .and(query_param("uploadType", "resumable"))
        .and(query_param("name", "user-42/1/rivet.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/session/abc", blobs.uri()).as_str()),
        )
        .expect(1)
        .mount(&blobs)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"mediaLink": "https://cdn.example.com/user-42/1/rivet.jpg"})),
        )
        .expect(1)
        .mount(&blobs)
        .await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "avg_confidence": 0.77,
            "max_confidence": 0.98,
            "severity": "Medium",
            "crack_coverage_pct": 1.25,
            "quantification": {"length_mm": 12.5, "max_width_mm": 0.4, "mean_width_mm": 0.2},
            "overlay_image_b64": "iVBORw0KGgo="
        })))
        .expect(1)
        .mount(&inference)
        .await;

    let pipeline = Pipeline::new(
        fixture.store.clone(),
        Arc::new(HttpBlobUploader::new(blobs.uri())),
        Arc::new(WithTimeout::new(
            HttpInferenceClient::with_path(reqwest::Client::new(), &inference.uri(), "/predict"),
            Duration::from_secs(10),
        )),
    );

    let image = fixture.image("rivet.jpg", &[9; 300]).await;
    let record = pipeline.submit(&image, &user()).await.unwrap();

    assert_eq!(record.status(), RecordStatus::Completed);
    assert_eq!(
        record.storage_ref().unwrap().url,
        "https://cdn.example.com/user-42/1/rivet.jpg"
    );
    let result = record.result().unwrap();
    assert_eq!(result.confidence, Some(0.77));
    assert_eq!(result.max_confidence, Some(0.98));
    assert_eq!(result.severity.as_deref(), Some("Medium"));
    assert_eq!(
        result.overlay_url.as_deref(),
        Some("data:image/png;base64,iVBORw0KGgo=")
    );
    let measurements = result.measurements.as_ref().unwrap();
    assert_eq!(measurements.coverage_pct, Some(1.25));
    assert_eq!(measurements.length_mm, Some(12.5));
}

#[tokio::test]
async fn rejected_blob_upload_fails_without_calling_inference() {
    let fixture = Fixture::new();
    let blobs = MockServer::start().await;
    let inference = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/o"))
        .respond_with(ResponseTemplate::new(403).set_body_string("bucket is read-only"))
        .mount(&blobs)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&inference)
        .await;

    let pipeline = Pipeline::new(
        fixture.store.clone(),
        Arc::new(HttpBlobUploader::new(blobs.uri())),
        Arc::new(HttpInferenceClient::new(&inference.uri())),
    );

    let image = fixture.image("wing-crack.jpg", &[5; 16]).await;
    let record = pipeline.submit(&image, &user()).await.unwrap();

    assert_eq!(record.status(), RecordStatus::AnalysisFailed);
    assert!(record.error().unwrap().contains("403"));
    assert!(record.storage_ref().is_none());
    assert!(record.result().is_none());
}

#[tokio::test]
async fn overflowing_resume_range_fails_the_submission() {
    let fixture = Fixture::new();
    let blobs = MockServer::start().await;
    let inference = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/o"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Location", format!("{}/session/xyz", blobs.uri()).as_str()),
        )
        .mount(&blobs)
        .await;
    Mock::given(method("PUT"))
        .and(path("/session/xyz"))
        .respond_with(
            ResponseTemplate::new(308).insert_header("Range", "bytes=0-18446744073709551615"),
        )
        .mount(&blobs)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&inference)
        .await;

    let pipeline = Pipeline::new(
        fixture.store.clone(),
        Arc::new(HttpBlobUploader::new(blobs.uri())),
        Arc::new(HttpInferenceClient::new(&inference.uri())),
    );

    let image = fixture.image("wing-crack.jpg", &[6; 32]).await;
    let record = pipeline.submit(&image, &user()).await.unwrap();

    assert_eq!(record.status(), RecordStatus::AnalysisFailed);
    assert!(record.error().unwrap().contains("range"));
    assert!(record.storage_ref().is_none());

    let persisted = fixture.store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(persisted.status(), RecordStatus::AnalysisFailed);
}

#[tokio::test]
async fn empty_image_is_rejected_without_a_record() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;

    let image = fixture.image("empty.jpg", &[]).await;
    let err = fixture
        .fs_pipeline(&server.uri())
        .submit(&image, &user())
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(fixture.store.stats().unwrap().total, 0);
}
