//! HTTP boundary tests: the router driven with `tower::ServiceExt::oneshot`.
//!
//! Conversion runs through stand-in engines so these tests never need
//! LibreOffice.

mod common;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{docx, paragraph, plain_text};
use docfill::server::{router, AppState};
use docfill::{
    ConversionEngine, ConversionJob, DefaultTemplate, DocfillError, Generator, GeneratorConfig,
    GeneratorConfigBuilder, ServerSettings, DOCX_MEDIA_TYPE,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "docfill-test-boundary";

// ── Stand-in engines ─────────────────────────────────────────────────────────

/// Writes `FAKE-<TARGET>` followed by the input bytes; records every job.
#[derive(Default)]
struct FakeEngine {
    jobs: Mutex<Vec<ConversionJob>>,
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(&self, job: &ConversionJob) -> Result<PathBuf, DocfillError> {
        self.jobs.lock().unwrap().push(job.clone());
        let mut bytes = format!("FAKE-{}", job.target.extension().to_uppercase()).into_bytes();
        bytes.extend(tokio::fs::read(&job.input_path).await.unwrap());
        let out = job.out_dir.join(format!("source.{}", job.target.extension()));
        tokio::fs::write(&out, bytes).await.unwrap();
        Ok(out)
    }
}

struct BrokenEngine;

#[async_trait]
impl ConversionEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run(&self, _job: &ConversionJob) -> Result<PathBuf, DocfillError> {
        Err(DocfillError::ConversionFailed {
            detail: "exit status 77: /opt/secret/soffice crashed".into(),
        })
    }
}

struct AbsentEngine;

#[async_trait]
impl ConversionEngine for AbsentEngine {
    fn name(&self) -> &str {
        "absent"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn run(&self, _job: &ConversionJob) -> Result<PathBuf, DocfillError> {
        Err(DocfillError::ConversionEngineUnavailable {
            engine: "absent".into(),
            reason: "not installed".into(),
        })
    }
}

struct StuckEngine;

#[async_trait]
impl ConversionEngine for StuckEngine {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn run(&self, _job: &ConversionJob) -> Result<PathBuf, DocfillError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        unreachable!()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn bundled_template() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(DefaultTemplate::RELATIVE_PATH)
}

fn base_config() -> GeneratorConfigBuilder {
    GeneratorConfig::builder().default_template(DefaultTemplate::Found(bundled_template()))
}

fn app_with(builder: GeneratorConfigBuilder) -> Router {
    let generator = Generator::new(builder.build().unwrap()).unwrap();
    router(AppState::new(generator, &ServerSettings::default()))
}

fn app_with_engine(engine: Arc<dyn ConversionEngine>) -> Router {
    app_with(base_config().engine(engine))
}

fn app() -> Router {
    app_with_engine(Arc::new(FakeEngine::default()))
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend(value.as_bytes());
            }
            Part::File(name, filename, data) => {
                body.extend(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend(*data);
            }
        }
        body.extend(b"\r\n");
    }
    body.extend(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'r>(response: &'r Response, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Serve `template` at `/t.docx` on an ephemeral local port.
async fn template_server(template: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/t.docx",
        axum::routing::get(move || {
            let bytes = template.clone();
            async move { bytes }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ── /generate-docx ───────────────────────────────────────────────────────────

#[tokio::test]
async fn generate_with_default_template_from_form() {
    let response = send(
        app(),
        multipart_request(
            "/generate-docx",
            &[Part::Text(
                "data",
                r#"{"CourseTitle":"Sample Course","CourseCode":"CS101"}"#,
            )],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), DOCX_MEDIA_TYPE);
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=result.docx"
    );
    assert_eq!(header_str(&response, "x-template-source"), "Default template");

    let text = plain_text(&body_bytes(response).await);
    assert!(text.contains("Sample Course"), "{text}");
    assert!(text.contains("CS101"), "{text}");
}

#[tokio::test]
async fn generate_from_json_body() {
    let response = send(
        app(),
        json_request(
            "/generate-docx",
            json!({"data": {"CourseTitle": "Sample Course", "CourseCode": "CS101"}}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(plain_text(&body_bytes(response).await).contains("CS101"));
}

#[tokio::test]
async fn uploaded_template_is_used_and_removed() {
    let uploads = tempfile::tempdir().unwrap();
    let app = app_with(
        base_config()
            .engine(Arc::new(FakeEngine::default()))
            .upload_dir(uploads.path()),
    );
    let template = docx(&[paragraph(&["Hello {name}"])]);

    let response = send(
        app,
        multipart_request(
            "/generate-docx",
            &[
                Part::File("template", "greeting.docx", &template),
                Part::Text("data", r#"{"name":"Ada"}"#),
            ],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "x-template-source"),
        "Uploaded: greeting.docx"
    );
    assert_eq!(plain_text(&body_bytes(response).await), "Hello Ada");
    assert!(dir_is_empty(uploads.path()), "staged upload left behind");
}

#[tokio::test]
async fn missing_data_is_bad_request() {
    let response = send(
        app(),
        multipart_request("/generate-docx", &[Part::Text("templateUrl", "")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Missing 'data' field", "kind": "missing_data"})
    );
}

#[tokio::test]
async fn invalid_json_data_is_bad_request() {
    let response = send(
        app(),
        multipart_request("/generate-docx", &[Part::Text("data", "{not json")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "invalid_data_format");
}

#[tokio::test]
async fn missing_field_is_bad_request() {
    let response = send(
        app(),
        json_request("/generate-docx", json!({"data": {"CourseTitle": "only"}})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "missing_field");
    assert!(body["error"].as_str().unwrap().contains("CourseCode"));
}

#[tokio::test]
async fn template_url_beats_default() {
    let base = template_server(docx(&[paragraph(&["Remote {x}"])])).await;
    let url = format!("{base}/t.docx");

    let response = send(
        app(),
        json_request("/generate-docx", json!({"data": {"x": 7}, "templateUrl": url})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "x-template-source"),
        format!("From URL: {url}")
    );
    assert_eq!(plain_text(&body_bytes(response).await), "Remote 7");
}

#[tokio::test]
async fn double_wrapped_payload_is_unwrapped() {
    let base = template_server(docx(&[paragraph(&["Wrapped {x}"])])).await;
    let inner = json!({"templateUrl": format!("{base}/t.docx"), "data": {"x": "ok"}});

    let response = send(
        app(),
        multipart_request("/generate-docx", &[Part::Text("data", &inner.to_string())]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(plain_text(&body_bytes(response).await), "Wrapped ok");
}

#[tokio::test]
async fn upload_beats_template_url() {
    let base = template_server(docx(&[paragraph(&["Remote"])])).await;
    let template = docx(&[paragraph(&["Local"])]);
    let url = format!("{base}/t.docx");

    let response = send(
        app(),
        multipart_request(
            "/generate-docx",
            &[
                Part::Text("templateUrl", &url),
                Part::File("template", "local.docx", &template),
                Part::Text("data", "{}"),
            ],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(plain_text(&body_bytes(response).await), "Local");
}

#[tokio::test]
async fn unreachable_template_url_is_reported() {
    let base = template_server(Vec::new()).await;
    let response = send(
        app(),
        json_request(
            "/generate-docx",
            json!({"data": {}, "templateUrl": format!("{base}/missing.docx")}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "template_download_failed");
}

#[tokio::test]
async fn non_http_template_url_is_rejected() {
    let response = send(
        app(),
        json_request(
            "/generate-docx",
            json!({"data": {}, "templateUrl": "file:///etc/passwd"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "invalid_template_url");
}

#[tokio::test]
async fn missing_default_template_is_server_error() {
    let empty = tempfile::tempdir().unwrap();
    let app = app_with(
        GeneratorConfig::builder()
            .default_template(DefaultTemplate::locate(None, &[empty.path().to_path_buf()]))
            .engine(Arc::new(FakeEngine::default())),
    );
    let response = send(app, json_request("/generate-docx", json!({"data": {}}))).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "template_missing");
    assert_eq!(body["error"], "Default template not found");
}

#[tokio::test]
async fn generate_and_convert_to_pdf() {
    let engine = Arc::new(FakeEngine::default());
    let response = send(
        app_with_engine(engine.clone()),
        multipart_request(
            "/generate-docx",
            &[
                Part::Text("data", r#"{"CourseTitle":"T","CourseCode":"C"}"#),
                Part::Text("outputFormat", "pdf"),
            ],
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), "application/pdf");
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=converted.pdf"
    );
    assert!(body_bytes(response).await.starts_with(b"FAKE-PDF"));

    let jobs = engine.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(!jobs[0].scratch_dir.exists(), "conversion workspace left behind");
}

// ── /upload ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_converts_to_pdf_and_cleans_up() {
    let uploads = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::default());
    let app = app_with(base_config().engine(engine.clone()).upload_dir(uploads.path()));

    let response = send(
        app,
        multipart_request("/upload", &[Part::File("file", "report.docx", b"DOCX-BYTES")]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), "application/pdf");
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=converted.pdf"
    );
    assert!(response.headers().get("x-template-source").is_none());
    assert_eq!(body_bytes(response).await, b"FAKE-PDFDOCX-BYTES");

    let jobs = engine.jobs.lock().unwrap();
    assert!(jobs[0].input_path.to_string_lossy().ends_with(".docx"));
    assert!(!jobs[0].scratch_dir.exists());
    assert!(dir_is_empty(uploads.path()), "staged upload left behind");
}

#[tokio::test]
async fn upload_to_other_format() {
    let response = send(
        app(),
        multipart_request(
            "/upload",
            &[
                Part::Text("format", "odt"),
                Part::File("file", "notes.docx", b"x"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "content-disposition"),
        "attachment; filename=converted.odt"
    );
}

#[tokio::test]
async fn upload_without_file() {
    let response = send(app(), multipart_request("/upload", &[Part::Text("format", "pdf")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "No file uploaded", "kind": "no_file_uploaded"})
    );

    let response = send(app(), json_request("/upload", json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "no_file_uploaded");
}

#[tokio::test]
async fn upload_unsupported_format() {
    let response = send(
        app(),
        multipart_request(
            "/upload",
            &[Part::Text("format", "xlsx"), Part::File("file", "a.docx", b"x")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["kind"], "unsupported_format");
}

#[tokio::test]
async fn conversion_failure_hides_details() {
    let uploads = tempfile::tempdir().unwrap();
    let app = app_with(base_config().engine(Arc::new(BrokenEngine)).upload_dir(uploads.path()));

    let response = send(
        app,
        multipart_request("/upload", &[Part::File("file", "a.docx", b"x")]),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Conversion failed", "kind": "conversion_failed"})
    );
    assert!(dir_is_empty(uploads.path()), "staged upload left behind");
}

#[tokio::test]
async fn absent_engine_is_unavailable() {
    let response = send(
        app_with_engine(Arc::new(AbsentEngine)),
        multipart_request("/upload", &[Part::File("file", "a.docx", b"x")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await["kind"],
        "conversion_engine_unavailable"
    );
}

#[tokio::test]
async fn stuck_engine_times_out() {
    let app = app_with(
        base_config()
            .engine(Arc::new(StuckEngine))
            .conversion_timeout_secs(1),
    );
    let response = send(
        app,
        multipart_request("/upload", &[Part::File("file", "a.docx", b"x")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["kind"], "conversion_timeout");
}

// ── /healthz ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_reports_converter() {
    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = send(app(), request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"status": "ok", "converter": true})
    );

    let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let response = send(app_with_engine(Arc::new(AbsentEngine)), request).await;
    assert_eq!(body_json(response).await["converter"], false);
}
