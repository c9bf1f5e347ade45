mod common;

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;

use ielts_exam_runtime::error::RuntimeError;
use ielts_exam_runtime::models::{AdvanceResponse, AnswerValue, SaveAnswerRequest, SectionType};
use ielts_exam_runtime::services::{ExamApi, HttpExamApi};
use ielts_exam_runtime::Config;

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: Bytes,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

async fn backend(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        authorization: header("authorization"),
        content_type: header("content-type"),
        body,
    });

    let path = uri.path();
    if path.ends_with("/sections/listening") {
        return Json(json!({
            "section_name": "listening",
            "time_remaining": 1800,
            "next_section_name": "reading",
            "parts": [
                {
                    "id": "part-1",
                    "audio_url": "https://cdn.test/part1.mp3",
                    "question_groups": [
                        { "id": "g1", "questions": [ { "id": "q1", "order": 1, "user_answer": "Tuesday" } ] }
                    ]
                }
            ]
        }))
        .into_response();
    }
    if path.ends_with("/sections/speaking") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response();
    }
    if path.ends_with("/answers") {
        return Json(json!({ "success": true })).into_response();
    }
    if path.ends_with("/writing") || path.ends_with("/speaking") {
        return Json(json!({ "status": "received" })).into_response();
    }
    if path.ends_with("/advance") {
        return Json(json!({ "current_section": "COMPLETED" })).into_response();
    }
    if path.ends_with("/submit") {
        return StatusCode::NO_CONTENT.into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn spawn_backend() -> (HttpExamApi, Log) {
    common::init_tracing();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(backend).with_state(log.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = Config::for_base_url(format!("http://{}/api/v1", addr));
    config.api_token = Some("token-123".to_string());
    (HttpExamApi::new(&config).unwrap(), log)
}

fn last(log: &Log) -> Recorded {
    log.lock().unwrap().last().cloned().expect("a recorded request")
}

#[tokio::test]
async fn fetches_section_payload() {
    let (api, log) = spawn_backend().await;

    let payload = api
        .fetch_section("att 1", SectionType::Listening)
        .await
        .unwrap();

    assert_eq!(payload.time_remaining, Some(1800));
    assert_eq!(payload.next_section_name.as_deref(), Some("reading"));
    assert_eq!(payload.blocks[0].groups[0].questions[0].id, "q1");

    let request = last(&log);
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.path, "/api/v1/attempts/att%201/sections/listening");
    assert_eq!(request.authorization.as_deref(), Some("Bearer token-123"));
}

#[tokio::test]
async fn posts_answers_as_json() {
    let (api, log) = spawn_backend().await;
    let request = SaveAnswerRequest {
        question_id: "q5".to_string(),
        answer: AnswerValue::Structured(json!({ "1": "iv" })),
    };

    assert!(api.save_answer("att-1", &request).await.unwrap());

    let recorded = last(&log);
    assert_eq!(recorded.method, Method::POST);
    assert_eq!(recorded.path, "/api/v1/attempts/att-1/answers");
    let body: serde_json::Value = serde_json::from_slice(&recorded.body).unwrap();
    assert_eq!(body, json!({ "question_id": "q5", "answer": { "1": "iv" } }));
}

#[tokio::test]
async fn uploads_writing_and_speaking() {
    let (api, log) = spawn_backend().await;

    let reply = api
        .submit_writing("att-1", "task-2", "Public transport should be free.")
        .await
        .unwrap();
    assert_eq!(reply["status"], "received");
    let writing: serde_json::Value = serde_json::from_slice(&last(&log).body).unwrap();
    assert_eq!(writing["task_id"], "task-2");

    api.submit_speaking("att-1", "part1-q3", b"RIFFwebm".to_vec())
        .await
        .unwrap();
    let speaking = last(&log);
    assert_eq!(speaking.path, "/api/v1/attempts/att-1/speaking");
    assert!(speaking
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&speaking.body);
    assert!(body.contains("name=\"question_key\""));
    assert!(body.contains("part1-q3"));
    assert!(body.contains("filename=\"answer.webm\""));
    assert!(body.contains("audio/webm"));
}

#[tokio::test]
async fn advance_and_submit_read_completion() {
    let (api, log) = spawn_backend().await;

    assert_eq!(
        api.advance_section("att-1").await.unwrap(),
        AdvanceResponse::Completed
    );
    assert!(api.submit_final("att-1").await.unwrap());
    assert_eq!(last(&log).path, "/api/v1/attempts/att-1/submit");
}

#[tokio::test]
async fn server_errors_surface_status_and_body() {
    let (api, _log) = spawn_backend().await;

    let err = api
        .fetch_section("att-1", SectionType::Speaking)
        .await
        .unwrap_err();

    match err {
        RuntimeError::BadResponse {
            status, message, ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
}
