//! HTTP API integration tests.
//!
//! Drives whole conversations through the axum router with `oneshot`
//! requests, backed by the scripted stubs.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use tutor_orchestrator::testing::{ScriptedGenerator, ScriptedInterlocutor, ScriptedOracle};
use tutor_orchestrator::{
    create_router, AppState, Config, ConversationStore, Student, Topic, TurnExecutor,
};

fn router(max_turns: u32) -> Router {
    let interlocutor = Arc::new(ScriptedInterlocutor::new(max_turns).with_catalog(
        vec![Student {
            id: "stu-1".to_string(),
            name: "Noor".to_string(),
            grade_level: 11,
        }],
        vec![Topic {
            id: "top-1".to_string(),
            subject_id: "phys".to_string(),
            subject_name: Some("Physics".to_string()),
            name: "Newton's laws".to_string(),
            grade_level: 11,
        }],
    ));
    let executor = TurnExecutor::from_config(
        &Config::default(),
        ConversationStore::new(),
        Arc::new(ScriptedOracle::new()),
        Arc::new(ScriptedGenerator::new()),
        interlocutor.clone(),
    );
    create_router(AppState::new(
        Config::default(),
        Arc::new(executor),
        interlocutor,
    ))
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request builds"))
        .await
        .expect("router responds");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("JSON body")
    };
    (status, value)
}

#[tokio::test]
async fn test_full_conversation_over_http() {
    let router = router(3);

    let (status, started) = send(
        &router,
        Method::POST,
        "/api/tutor/start",
        Some(json!({ "student_id": "stu-1", "topic_id": "top-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["max_turns"], 3);
    let id = started["conversation_id"].as_str().expect("id").to_string();

    let mut last = Value::Null;
    for expected_turn in 1..=3 {
        let (status, body) = send(
            &router,
            Method::POST,
            "/api/tutor/interact",
            Some(json!({ "conversation_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["turn_number"], expected_turn);
        last = body;
    }
    assert_eq!(last["is_complete"], true);

    let (status, record) = send(&router, Method::GET, &format!("/api/conversations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["student_profile"]["name"], "Noor");
    assert_eq!(record["topic_info"]["subject_name"], "Physics");
    assert_eq!(record["transcript"].as_array().map(Vec::len), Some(6));
    assert_eq!(record["ended"], true);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/tutor/interact",
        Some(json!({ "conversation_id": id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("message").contains(&id));
}

#[tokio::test]
async fn test_explicit_message_is_echoed() {
    let router = router(5);
    let (_, started) = send(
        &router,
        Method::POST,
        "/api/tutor/start",
        Some(json!({ "student_id": "stu-1", "topic_id": "top-1" })),
    )
    .await;
    let id = started["conversation_id"].as_str().expect("id").to_string();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/tutor/interact",
        Some(json!({ "conversation_id": id, "tutor_message": "What does F = ma mean?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tutor_message"], "What does F = ma mean?");
}

#[tokio::test]
async fn test_blank_message_is_generated_instead() {
    let router = router(5);
    let (_, started) = send(
        &router,
        Method::POST,
        "/api/tutor/start",
        Some(json!({ "student_id": "stu-1", "topic_id": "top-1" })),
    )
    .await;
    let id = started["conversation_id"].as_str().expect("id").to_string();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/tutor/interact",
        Some(json!({ "conversation_id": id, "tutor_message": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tutor_message"], "Scripted tutor message 1");
}

#[tokio::test]
async fn test_evicted_conversation_is_gone() {
    let router = router(5);
    let (_, started) = send(
        &router,
        Method::POST,
        "/api/tutor/start",
        Some(json!({ "student_id": "stu-1", "topic_id": "top-1" })),
    )
    .await;
    let id = started["conversation_id"].as_str().expect("id").to_string();
    let uri = format!("/api/conversations/{id}");

    let (status, _) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/tutor/interact",
        Some(json!({ "conversation_id": id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, health) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(health["live_conversations"], 0);
}
