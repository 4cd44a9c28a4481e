//! `HttpInterlocutor` against an in-process mock of the student service.
//!
//! The mock is an axum router bound to an ephemeral port; the client talks
//! to it over real HTTP with reqwest.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tutor_orchestrator::testing::{ScriptedGenerator, ScriptedOracle};
use tutor_orchestrator::{
    Catalog, Config, ConversationStore, HttpInterlocutor, Interlocutor, Prediction, SetType,
    TransportErrorKind, TurnExecutor, TutorError,
};

const API_KEY: &str = "test-key";
const MAX_TURNS: u64 = 3;

#[derive(Default)]
struct MockService {
    turns: Mutex<HashMap<String, u64>>,
    student_queries: Mutex<Vec<HashMap<String, String>>>,
    predictions: Mutex<Vec<Value>>,
}

type Shared = Arc<MockService>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "bad key" }))).into_response()
}

async fn start(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "conversation_id": format!("mock-{}", body["student_id"].as_str().unwrap_or("x")),
        "student_id": body["student_id"],
        "topic_id": body["topic_id"],
        "max_turns": MAX_TURNS,
        "conversations_remaining": 7
    }))
    .into_response()
}

async fn interact(
    State(service): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let message = body["tutor_message"].as_str().unwrap_or_default().to_string();
    match message.as_str() {
        "fail" => return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response(),
        "garbage" => return (StatusCode::OK, "definitely not json").into_response(),
        _ => {}
    }

    let id = body["conversation_id"].as_str().unwrap_or_default().to_string();
    let turn = {
        let mut turns = service.turns.lock().unwrap();
        let turn = turns.entry(id.clone()).or_insert(0);
        *turn += 1;
        *turn
    };

    Json(json!({
        "student_response": format!("echo: {message}"),
        "turn_number": turn,
        "is_complete": turn >= MAX_TURNS,
        "interaction_id": format!("{id}-{turn}")
    }))
    .into_response()
}

async fn students(
    State(service): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    service.student_queries.lock().unwrap().push(query);
    Json(json!([
        { "id": "stu-1", "name": "Ines", "grade_level": 8 },
        { "id": "stu-2", "name": "Omar", "grade_level": 12 }
    ]))
    .into_response()
}

async fn student_topics(headers: HeaderMap, Path(student_id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let topics = if student_id == "stu-1" {
        json!([{ "id": "top-1", "subject_id": "chem", "name": "Atoms", "grade_level": 8 }])
    } else {
        json!([])
    };
    Json(topics).into_response()
}

async fn topics(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        {
            "id": "top-1",
            "subject_id": "chem",
            "subject_name": "Chemistry",
            "name": "Atoms",
            "grade_level": 8
        }
    ]))
    .into_response()
}

async fn evaluate_mse(
    State(service): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let count = body["predictions"].as_array().map_or(0, Vec::len);
    service.predictions.lock().unwrap().push(body);
    Json(json!({
        "mse_score": 0.25,
        "num_predictions": count,
        "submission_number": 1,
        "submissions_remaining": 4
    }))
    .into_response()
}

async fn evaluate_tutoring(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let score = if body["set_type"] == "dev" { 7.5 } else { 0.0 };
    Json(json!({
        "score": score,
        "num_conversations": 12,
        "submission_number": 2
    }))
    .into_response()
}

async fn spawn_mock() -> (SocketAddr, Shared) {
    let service = Shared::default();
    let app = Router::new()
        .route("/interact/start", post(start))
        .route("/interact", post(interact))
        .route("/students", get(students))
        .route("/students/:id/topics", get(student_topics))
        .route("/topics", get(topics))
        .route("/evaluate/mse", post(evaluate_mse))
        .route("/evaluate/tutoring", post(evaluate_tutoring))
        .with_state(Arc::clone(&service));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });
    (addr, service)
}

fn client(addr: SocketAddr, key: &str) -> HttpInterlocutor {
    HttpInterlocutor::new(format!("http://{addr}/"), key, Duration::from_secs(5))
        .expect("client builds")
}

// ============================================================================
// Conversation endpoints
// ============================================================================

#[tokio::test]
async fn test_start_and_exchange() {
    let (addr, _) = spawn_mock().await;
    let client = client(addr, API_KEY);
    assert_eq!(client.base_url(), format!("http://{addr}"));

    let started = client
        .start_conversation("stu-1", "top-1")
        .await
        .expect("start");
    assert_eq!(started.conversation_id, "mock-stu-1");
    assert_eq!(started.max_turns, 3);
    assert_eq!(started.remaining_quota, Some(7));

    let reply = client
        .exchange(&started.conversation_id, "Hello!")
        .await
        .expect("exchange");
    assert_eq!(reply.student_reply, "echo: Hello!");
    assert_eq!(reply.turn_number, 1);
    assert!(!reply.is_complete);
    assert_eq!(reply.interaction_id.as_deref(), Some("mock-stu-1-1"));
}

#[tokio::test]
async fn test_wrong_key_is_status_failure() {
    let (addr, _) = spawn_mock().await;
    let client = client(addr, "wrong");

    let err = client
        .start_conversation("stu-1", "top-1")
        .await
        .expect_err("rejected");

    assert!(matches!(
        err,
        TutorError::TransportFailure {
            kind: TransportErrorKind::Status(401),
            ..
        }
    ));
}

#[tokio::test]
async fn test_server_error_and_bad_body() {
    let (addr, _) = spawn_mock().await;
    let client = client(addr, API_KEY);

    let err = client.exchange("c", "fail").await.expect_err("503");
    assert!(matches!(
        err,
        TutorError::TransportFailure {
            kind: TransportErrorKind::Status(503),
            ..
        }
    ));
    assert!(err.is_retryable());

    let err = client.exchange("c", "garbage").await.expect_err("decode");
    assert!(matches!(
        err,
        TutorError::TransportFailure {
            kind: TransportErrorKind::Decode,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_service_is_network_failure() {
    // Reserve a port, then free it so nothing is listening
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr")
    };
    let client = client(addr, API_KEY);

    let err = client
        .start_conversation("stu-1", "top-1")
        .await
        .expect_err("unreachable");

    assert!(matches!(
        err,
        TutorError::TransportFailure {
            kind: TransportErrorKind::Network,
            ..
        }
    ));
}

#[tokio::test]
async fn test_executor_runs_against_http_service() {
    let (addr, _) = spawn_mock().await;
    let interlocutor = Arc::new(client(addr, API_KEY));
    let executor = TurnExecutor::from_config(
        &Config::default(),
        ConversationStore::new(),
        Arc::new(ScriptedOracle::new()),
        Arc::new(ScriptedGenerator::new()),
        interlocutor.clone(),
    );

    let profile = interlocutor.student_profile("stu-1").await.expect("profile");
    let topic = interlocutor.topic_info("top-1").await.expect("topic");
    assert_eq!(profile.name, "Ines");
    assert_eq!(topic.subject_name, "Chemistry");

    let session = executor
        .start_conversation("stu-1", "top-1", profile, topic)
        .await
        .expect("start");
    let record = executor
        .run_to_completion(session.record.conversation_id())
        .await
        .expect("completes");

    assert_eq!(record.turn_count(), 3);
    assert!(record.is_ended());
    assert_eq!(record.transcript()[1].text, "echo: Scripted tutor message 1");
    assert_eq!(record.student_profile().grade_level, 8);
}

// ============================================================================
// Catalog and evaluation endpoints
// ============================================================================

#[tokio::test]
async fn test_catalog_listings() {
    let (addr, service) = spawn_mock().await;
    let client = client(addr, API_KEY);

    let students = client
        .list_students(Some(SetType::MiniDev))
        .await
        .expect("students");
    assert_eq!(students.len(), 2);
    assert_eq!(students[1].name, "Omar");
    let queries = service.student_queries.lock().unwrap().clone();
    assert_eq!(queries[0].get("set_type").map(String::as_str), Some("mini_dev"));

    let topics = client.list_student_topics("stu-1").await.expect("topics");
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].subject_name, None);
    assert!(client
        .list_student_topics("stu-2")
        .await
        .expect("topics")
        .is_empty());

    let unknown = client.student_profile("nobody").await.expect("profile");
    assert!(unknown.name.is_empty());
}

#[tokio::test]
async fn test_submit_predictions_and_evaluate() {
    let (addr, service) = spawn_mock().await;
    let client = client(addr, API_KEY);
    let predictions = vec![
        Prediction {
            student_id: "stu-1".to_string(),
            topic_id: "top-1".to_string(),
            predicted_level: 2,
        },
        Prediction {
            student_id: "stu-2".to_string(),
            topic_id: "top-1".to_string(),
            predicted_level: 4,
        },
    ];

    let mse = client
        .submit_predictions(SetType::Dev, &predictions)
        .await
        .expect("mse");
    assert!((mse.mse_score - 0.25).abs() < f64::EPSILON);
    assert_eq!(mse.num_predictions, 2);
    assert_eq!(mse.submissions_remaining, Some(4));

    let sent = service.predictions.lock().unwrap().clone();
    assert_eq!(sent[0]["set_type"], "dev");
    assert_eq!(sent[0]["predictions"][1]["predicted_level"], 4);

    let evaluation = client
        .evaluate_tutoring(SetType::Dev)
        .await
        .expect("evaluation");
    assert!((evaluation.score - 7.5).abs() < f64::EPSILON);
    assert_eq!(evaluation.num_conversations, 12);
    assert_eq!(evaluation.submissions_remaining, None);
}
