//! Integration tests for the upload and progress endpoints
//!
//! These exercise the HTTP surface against the in-memory store: multipart
//! upload, status polling, SSE stream attach, and the error paths.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use rosterd_server::config::ImportConfig;
use rosterd_server::import::{routes::ImportState, JobRegistry, ProgressPublisher};
use rosterd_server::store::MemoryStore;
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "rosterd-test-boundary";

fn test_app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_groups(&["7B", "8A"], &["Y7", "Y8"]));
    let state = ImportState {
        registry: Arc::new(JobRegistry::new(Duration::from_secs(300), 50)),
        publisher: Arc::new(ProgressPublisher::new(256)),
        store: store.clone(),
        directory: store.clone(),
        config: ImportConfig::default(),
    };

    let app = Router::new().nest(
        "/api/v1",
        rosterd_server::import::routes::import_routes(1024 * 1024).with_state(state),
    );
    (app, store)
}

fn multipart_upload(csv: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"roster.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{b}--\r\n",
        b = BOUNDARY,
        csv = csv
    );
    Request::builder()
        .method("POST")
        .uri("/api/v1/imports/students")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll the status route until the job reaches a terminal state.
async fn wait_for_terminal(app: &Router, upload_id: &str) -> Value {
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/imports/students/{}", upload_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let status = json["data"]["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {} never reached a terminal state", upload_id);
}

#[tokio::test]
async fn upload_returns_id_before_processing_finishes() {
    let (app, store) = test_app();
    let csv = "external_id,first_name,last_name,class_group,year_group,guardian_email\n\
               S-1,Ada,Byron,7B,Y7,ada.parent@example.org\n\
               S-2,Alan,Turing,8A,Y8,alan.parent@example.org\n";

    let response = app.clone().oneshot(multipart_upload(csv)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["total"], 2);
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();

    let final_json = wait_for_terminal(&app, &upload_id).await;
    assert_eq!(final_json["data"]["status"], "completed");
    assert_eq!(final_json["data"]["processed"], 2);
    assert_eq!(final_json["data"]["success"], 2);
    assert_eq!(final_json["data"]["error"], 0);
    assert_eq!(store.record_count(), 2);
}

#[tokio::test]
async fn empty_file_is_rejected_without_a_job() {
    let (app, _) = test_app();
    let csv = "external_id,first_name,last_name,class_group,year_group,guardian_email\n";

    let response = app.clone().oneshot(multipart_upload(csv)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "EMPTY_FILE");
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let (app, _) = test_app();
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/imports/students")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "MISSING_FILE");
}

#[tokio::test]
async fn unknown_upload_id_is_not_found() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/imports/students/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/imports/students/does-not-exist/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_stream_after_completion_delivers_terminal_frame_and_closes() {
    let (app, _) = test_app();
    let csv = "external_id,first_name,last_name,class_group,year_group,guardian_email\n\
               S-1,Ada,Byron,7B,Y7,ada.parent@example.org\n";

    let response = app.clone().oneshot(multipart_upload(csv)).await.unwrap();
    let json = body_json(response).await;
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();

    wait_for_terminal(&app, &upload_id).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/imports/students/{}/events", upload_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    // The stream closes server-side after the terminal frame, so the whole
    // body can be read to the end.
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("\"type\":\"completed\""));
    assert!(!body.contains("\"type\":\"progress\""));
}

#[tokio::test]
async fn rows_with_errors_still_complete_the_job() {
    let (app, _) = test_app();
    let csv = "external_id,first_name,last_name,class_group,year_group,guardian_email\n\
               S-1,Ada,Byron,7B,Y7,ada.parent@example.org\n\
               S-2,Alan,Turing,7B,Y99,alan.parent@example.org\n\
               S-3,Grace,Hopper,7B,Y7,bad-email\n";

    let response = app.clone().oneshot(multipart_upload(csv)).await.unwrap();
    let json = body_json(response).await;
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();

    let final_json = wait_for_terminal(&app, &upload_id).await;
    assert_eq!(final_json["data"]["status"], "completed");
    assert_eq!(final_json["data"]["success"], 1);
    assert_eq!(final_json["data"]["error"], 2);

    let recent = final_json["data"]["recent"].as_array().unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent[1]["message"].as_str().unwrap().contains("Y99"));
}
