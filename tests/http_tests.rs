use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::{seeded_store, test_app, CORRECT};

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn start_session(app: &Router, mode: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/practice/start",
        Some(json!({
            "learnerId": "learner-1",
            "examId": "exam-1",
            "subjectId": "physics",
            "mode": mode,
            "xpGoal": 20
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    body["data"]["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_full_practice_flow() {
    let app = test_app(seeded_store("physics", &["kinematics", "optics"], 3));
    let session_id = start_session(&app, "recall").await;

    let (status, next) = send(
        &app,
        "POST",
        "/api/practice/next",
        Some(json!({ "learnerId": "learner-1", "sessionId": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = &next["data"];
    assert_eq!(data["xpSoFar"], 0);
    assert_eq!(data["xpGoal"], 20);
    assert_eq!(data["bonusActive"], false);
    assert!(data["question"]["id"].is_string());
    assert!(data["question"].get("correctAnswer").is_none());
    let delivery_id = data["deliveryId"].as_str().unwrap().to_string();

    let (status, outcome) = send(
        &app,
        "POST",
        "/api/practice/answer",
        Some(json!({
            "learnerId": "learner-1",
            "sessionId": session_id,
            "deliveryId": delivery_id,
            "answer": CORRECT,
            "timeTakenSeconds": 14.2,
            "confidenceLevel": 4
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["data"]["isCorrect"], true);
    assert_eq!(outcome["data"]["xpAwarded"], 10);
    assert!(outcome["data"]["theta"].as_f64().unwrap() > 0.0);
    assert!(outcome["data"]["nextReviewDate"].is_string());

    let (status, duplicate) = send(
        &app,
        "POST",
        "/api/practice/answer",
        Some(json!({
            "learnerId": "learner-1",
            "sessionId": session_id,
            "deliveryId": delivery_id,
            "answer": CORRECT,
            "timeTakenSeconds": 3
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["success"], false);
    assert_eq!(duplicate["code"], "CONFLICT");

    let (status, progress) = send(
        &app,
        "GET",
        &format!("/api/practice/sessions/{session_id}?learnerId=learner-1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["data"]["questionsAnswered"], 1);
    assert_eq!(progress["data"]["status"], "in_progress");

    let end_body = json!({ "learnerId": "learner-1", "sessionId": session_id });
    let (status, ended) = send(&app, "POST", "/api/practice/end", Some(end_body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["success"], true);

    let (status, again) = send(&app, "POST", "/api/practice/end", Some(end_body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "CONFLICT");

    let (status, after_end) = send(
        &app,
        "POST",
        "/api/practice/next",
        Some(json!({ "learnerId": "learner-1", "sessionId": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(after_end["code"], "INVALID_STATE");
}

#[tokio::test]
async fn test_start_validation_errors() {
    let app = test_app(seeded_store("physics", &["kinematics"], 1));

    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/start",
        Some(json!({
            "learnerId": "learner-1",
            "examId": "exam-1",
            "subjectId": "physics",
            "mode": "cram",
            "xpGoal": 20
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/start",
        Some(json!({ "learnerId": "learner-1", "mode": "recall" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_malformed_json_is_invalid_argument() {
    let app = test_app(seeded_store("physics", &["kinematics"], 1));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/practice/next")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_unknown_session_and_foreign_learner() {
    let app = test_app(seeded_store("physics", &["kinematics"], 2));

    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/next",
        Some(json!({ "learnerId": "learner-1", "sessionId": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let session_id = start_session(&app, "refine").await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/next",
        Some(json!({ "learnerId": "intruder", "sessionId": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_empty_subject_reports_no_questions() {
    let app = test_app(seeded_store("chemistry", &["bonds"], 2));
    let session_id = start_session(&app, "conquer").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/next",
        Some(json!({ "learnerId": "learner-1", "sessionId": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NO_QUESTIONS_AVAILABLE");
}

#[tokio::test]
async fn test_answer_requires_answer_value() {
    let app = test_app(seeded_store("physics", &["kinematics"], 2));
    let session_id = start_session(&app, "recall").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/practice/answer",
        Some(json!({
            "learnerId": "learner-1",
            "sessionId": session_id,
            "deliveryId": "whatever",
            "answer": null,
            "timeTakenSeconds": 5
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = test_app(seeded_store("physics", &["kinematics"], 1));

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "connected");

    let (status, _) = send(&app, "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");

    let (status, body) = send(&app, "GET", "/health/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "practice-engine");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = test_app(seeded_store("physics", &["kinematics"], 1));
    let (status, body) = send(&app, "GET", "/api/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
