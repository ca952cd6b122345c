//! End-to-end tests: the full router forwarding to a mocked classification service.

use crate::test_utils::{TestPart, create_test_app, create_test_config, multipart_body, multipart_content_type};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn assert_no_spooled_files(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir).unwrap().collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

/// Matches requests whose raw body contains `needle`. Image payloads are not valid UTF-8, so the
/// string matchers never see them.
fn body_bytes_contain(needle: &'static [u8]) -> impl Fn(&Request) -> bool + Send + Sync {
    move |req: &Request| req.body.windows(needle.len()).any(|window| window == needle)
}

fn image_upload() -> Bytes {
    Bytes::from(multipart_body(&[TestPart::file(b"\x89PNG fake banana".to_vec())
        .with_file_name("namwa.png")
        .with_content_type("image/png")]))
}

#[test_log::test(tokio::test)]
async fn test_successful_upload_returns_downstream_json_verbatim() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .and(body_bytes_contain(br#"filename="namwa.png""#))
        .and(body_bytes_contain(b"Content-Type: image/png"))
        .and(body_bytes_contain(b"\x89PNG fake banana"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"label":"ripe"}"#, "application/json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.text(), r#"{"label":"ripe"}"#);
    assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
    assert_no_spooled_files(upload_dir.path());
}

#[test_log::test(tokio::test)]
async fn test_downstream_created_status_collapses_to_ok() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(201).set_body_raw(r#"{"label":"unripe","boxes":[]}"#, "application/json"))
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/api/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.text(), r#"{"label":"unripe","boxes":[]}"#);
}

#[test_log::test(tokio::test)]
async fn test_upload_without_metadata_uses_fallbacks() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .and(body_string_contains(r#"name="file"; filename="upload.jpg""#))
        .and(body_string_contains("Content-Type: image/jpeg"))
        .and(body_string_contains("bare bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"label":"overripe"}"#, "application/json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(Bytes::from(multipart_body(&[TestPart::file(b"bare bytes".to_vec())])))
        .await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.text(), r#"{"label":"overripe"}"#);
}

#[test_log::test(tokio::test)]
async fn test_missing_file_never_reaches_downstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(Bytes::from(multipart_body(&[TestPart::text("cultivar", "Cavendish")])))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>(), json!({ "success": false, "message": "No file uploaded" }));
}

#[test_log::test(tokio::test)]
async fn test_downstream_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"label":"ripe"}"#, "application/json")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), upload_dir.path());
    config.request_timeout = Duration::from_millis(300);
    let server = create_test_app(config);

    let started = Instant::now();
    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5), "timeout should bound the call");
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "AI Server connection failed");
    assert_eq!(body["error"], "timeout of 300ms exceeded");
    assert_no_spooled_files(upload_dir.path());
}

#[test_log::test(tokio::test)]
async fn test_downstream_error_status() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>(),
        json!({
            "success": false,
            "message": "AI Server connection failed",
            "error": "Request failed with status code 502"
        })
    );
    assert_no_spooled_files(upload_dir.path());
}

#[test_log::test(tokio::test)]
async fn test_downstream_non_json_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Service is waking up"))
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON in response body"));
}

#[test_log::test(tokio::test)]
async fn test_downstream_unreachable() {
    let upload_dir = tempfile::tempdir().unwrap();
    // Point to a port that's not listening
    let server = create_test_app(create_test_config("http://127.0.0.1:1", upload_dir.path()));

    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(image_upload())
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["message"], "AI Server connection failed");
    assert!(!body["error"].as_str().unwrap().is_empty());
    assert_no_spooled_files(upload_dir.path());
}

#[test_log::test(tokio::test)]
async fn test_repeated_uploads_forward_identical_payloads() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"label":"ripe"}"#, "application/json"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(&mock_server.uri(), upload_dir.path()));

    for _ in 0..2 {
        server
            .post("/detect")
            .content_type(&multipart_content_type())
            .bytes(image_upload())
            .await
            .assert_status(StatusCode::OK);
    }

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);

    // Boundaries are random per request; everything else must match
    let normalized: Vec<String> = received
        .iter()
        .map(|request| {
            let content_type = request.headers.get("content-type").unwrap().to_str().unwrap();
            let boundary = content_type.split("boundary=").nth(1).unwrap();
            String::from_utf8_lossy(&request.body).replace(boundary, "BOUNDARY")
        })
        .collect();
    assert_eq!(normalized[0], normalized[1]);
    assert!(normalized[0].contains(r#"filename="namwa.png""#));
}

#[test_log::test(tokio::test)]
async fn test_oversized_upload_is_parse_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let upload_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(&mock_server.uri(), upload_dir.path());
    config.limits.max_upload_size = 1024;
    let server = create_test_app(config);

    let body = multipart_body(&[TestPart::file(vec![0u8; 64 * 1024]).with_file_name("huge.jpg")]);
    let response = server
        .post("/detect")
        .content_type(&multipart_content_type())
        .bytes(Bytes::from(body))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>(), json!({ "success": false, "message": "Form parsing error" }));
    assert_no_spooled_files(upload_dir.path());
}

#[test_log::test(tokio::test)]
async fn test_get_on_detect_is_method_not_allowed() {
    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config("http://127.0.0.1:1", upload_dir.path()));

    let response = server.get("/detect").await;

    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.json::<Value>(), json!({ "message": "Method Not Allowed" }));
}

#[tokio::test]
async fn test_healthz() {
    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config("http://127.0.0.1:1", upload_dir.path()));

    let response = server.get("/healthz").await;
    assert_eq!(response.status_code().as_u16(), 200);
    assert_eq!(response.text(), "OK");
}

#[tokio::test]
async fn test_openapi_json_endpoint() {
    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config("http://127.0.0.1:1", upload_dir.path()));

    let response = server.get("/api-docs/openapi.json").await;
    assert_eq!(response.status_code().as_u16(), 200);

    let content = response.text();
    assert!(content.contains("\"openapi\""));
    assert!(content.contains("/detect"));
    assert!(content.contains("ErrorEnvelope"));

    let docs = server.get("/docs").await;
    assert_eq!(docs.status_code().as_u16(), 200);
}

#[tokio::test]
async fn test_cors_preflight_for_configured_origin() {
    let upload_dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config("http://127.0.0.1:1", upload_dir.path()));

    let response = server
        .method(Method::OPTIONS, "/detect")
        .add_header("origin", "http://localhost:5173")
        .add_header("access-control-request-method", "POST")
        .await;

    assert_eq!(response.status_code().as_u16(), 200);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
}

// The only test that enables metrics: the Prometheus recorder can be installed once per process.
#[tokio::test]
async fn test_metrics_endpoint() {
    let upload_dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config("http://127.0.0.1:1", upload_dir.path());
    config.enable_metrics = true;
    let server = create_test_app(config);

    server.get("/healthz").await.assert_status(StatusCode::OK);

    let response = server.get("/internal/metrics").await;
    assert_eq!(response.status_code().as_u16(), 200);
}
