//! End-to-end turn scenarios for the tutor orchestrator.
//!
//! Every test wires a real `TurnExecutor` to the scripted oracle, generator
//! and student from `tutor_orchestrator::testing`, so whole conversations
//! run deterministically without network access.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tutor_orchestrator::testing::{ScriptedGenerator, ScriptedInterlocutor, ScriptedOracle};
use tutor_orchestrator::{
    Config, ConversationRecord, ConversationStore, ExchangeResponse, RawAssessment, Role,
    StudentProfile, TopicInfo, TranscriptLog, TurnExecutor, TurnPhase, TutorError,
    UnderstandingLevel,
};
use tutor_report::{ReportGenerator, ReportInput, ReportStatus};

struct Harness {
    executor: Arc<TurnExecutor>,
    oracle: Arc<ScriptedOracle>,
    generator: Arc<ScriptedGenerator>,
    interlocutor: Arc<ScriptedInterlocutor>,
}

fn harness_with(interlocutor: ScriptedInterlocutor) -> Harness {
    let oracle = Arc::new(ScriptedOracle::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let interlocutor = Arc::new(interlocutor);
    let executor = TurnExecutor::from_config(
        &Config::default(),
        ConversationStore::new(),
        oracle.clone(),
        generator.clone(),
        interlocutor.clone(),
    );
    Harness {
        executor: Arc::new(executor),
        oracle,
        generator,
        interlocutor,
    }
}

fn harness(max_turns: u32) -> Harness {
    harness_with(ScriptedInterlocutor::new(max_turns))
}

fn raw(value: serde_json::Value) -> RawAssessment {
    serde_json::from_value(value).expect("valid raw assessment")
}

fn level(record: &ConversationRecord) -> Option<u8> {
    record.understanding_level().map(UnderstandingLevel::get)
}

async fn start(h: &Harness) -> String {
    let profile = StudentProfile {
        name: "Ada".to_string(),
        grade_level: 10,
    };
    let topic = TopicInfo {
        name: "Linear equations".to_string(),
        subject_id: "math".to_string(),
        subject_name: "Mathematics".to_string(),
        grade_level: 10,
    };
    h.executor
        .start_conversation("stu-1", "top-1", profile, topic)
        .await
        .expect("conversation starts")
        .record
        .conversation_id()
        .to_string()
}

fn temp_log_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tutor-it-{name}-{}", std::process::id()))
}

// ============================================================================
// Scenarios
// ============================================================================

/// A fresh conversation opens with a generated greeting and is assessed once
/// the first student reply exists.
#[tokio::test]
async fn test_fresh_conversation_first_turn() {
    let h = harness(10);
    let id = start(&h).await;
    h.interlocutor.queue_reply("I think you move x to one side?");
    h.oracle.queue_reply(raw(json!({
        "level": 2,
        "confidence": 0.45,
        "evidence": "Unsure about isolating x",
        "should_lock": false
    })));

    let outcome = h.executor.run_turn(&id, None).await.expect("turn runs");

    let generated = h.generator.recorded_requests();
    assert_eq!(generated.len(), 1);
    assert!(generated[0].is_opener);

    let record = h.executor.store().get(&id).expect("record stored");
    assert_eq!(record.transcript().len(), 2);
    assert_eq!(record.transcript()[0].role, Role::Tutor);
    assert_eq!(record.transcript()[1].text, "I think you move x to one side?");
    assert_eq!(h.oracle.call_count(), 1);
    assert_eq!(level(&record), Some(2));
    assert_eq!(record.evidence(), "Unsure about isolating x");
    assert!(!record.is_locked());
    assert_eq!(outcome.next_phase, TurnPhase::AwaitingTeaching);
}

/// The oracle never sees a request without student turns.
#[tokio::test]
async fn test_oracle_never_called_without_student_turns() {
    let h = harness(4);
    let id = start(&h).await;

    h.executor.run_to_completion(&id).await.expect("completes");

    let requests = h.oracle.recorded_requests();
    assert!(!requests.is_empty());
    assert!(requests.iter().all(|r| r.window.student_turns >= 1));
}

/// After locking, further turns do not consult the oracle and the estimate
/// is frozen.
#[tokio::test]
async fn test_lock_then_no_oracle() {
    let h = harness(5);
    let id = start(&h).await;
    h.oracle.queue_reply(raw(json!({
        "level": 4,
        "confidence": 0.9,
        "evidence": "Solved 2x + 3 = 7 unprompted",
        "should_lock": true
    })));

    let first = h.executor.run_turn(&id, None).await.expect("turn 1");
    assert!(first.locked);

    // Anything queued now would change the estimate if it were consulted
    h.oracle
        .queue_reply(raw(json!({ "level": 1, "confidence": 0.99 })));
    h.executor.run_turn(&id, None).await.expect("turn 2");
    h.executor.run_turn(&id, None).await.expect("turn 3");

    let record = h.executor.store().get(&id).expect("record stored");
    assert_eq!(h.oracle.call_count(), 1);
    assert_eq!(level(&record), Some(4));
    assert_eq!(record.confidence(), Some(0.9));
    assert_eq!(record.evidence(), "Solved 2x + 3 = 7 unprompted");
    assert_eq!(record.transcript().len(), 6);
}

/// An out-of-range level keeps the previous valid level, or 3 without one.
#[tokio::test]
async fn test_out_of_range_level_falls_back() {
    let h = harness(5);
    let id = start(&h).await;
    h.oracle.queue_reply(raw(
        json!({ "level": 7, "confidence": 0.4, "should_lock": false }),
    ));
    h.oracle.queue_reply(raw(
        json!({ "level": 2, "confidence": 0.5, "should_lock": false }),
    ));
    h.oracle.queue_reply(raw(
        json!({ "level": 7, "confidence": 0.5, "should_lock": false }),
    ));

    h.executor.run_turn(&id, None).await.expect("turn 1");
    let record = h.executor.store().get(&id).expect("record stored");
    assert_eq!(level(&record), Some(3));

    h.executor.run_turn(&id, None).await.expect("turn 2");
    h.executor.run_turn(&id, None).await.expect("turn 3");
    let record = h.executor.store().get(&id).expect("record stored");
    assert_eq!(level(&record), Some(2));
    assert!(!record.is_locked());
}

/// An oracle failure with no previous estimate yields the default estimate
/// and does not lock.
#[tokio::test]
async fn test_oracle_failure_without_previous_estimate() {
    let h = harness(5);
    let id = start(&h).await;

    // Empty script: the oracle reports a malformed reply
    let outcome = h.executor.run_turn(&id, None).await.expect("turn runs");

    assert_eq!(outcome.understanding_level.map(UnderstandingLevel::get), Some(3));
    assert_eq!(outcome.confidence, Some(0.3));
    assert!(!outcome.locked);
}

/// Reaching the ceiling without the student service signalling completion
/// rejects the next turn and leaves the record untouched.
#[tokio::test]
async fn test_turn_limit_reached() {
    let h = harness(2);
    let id = start(&h).await;
    for turn_number in 1..=2 {
        h.interlocutor.queue_response(ExchangeResponse {
            student_reply: format!("reply {turn_number}"),
            turn_number,
            is_complete: false,
            interaction_id: None,
        });
    }
    h.executor.run_turn(&id, None).await.expect("turn 1");
    h.executor.run_turn(&id, None).await.expect("turn 2");
    let before = h.executor.store().get(&id).expect("record stored");
    assert_eq!(before.turn_count(), 2);
    assert!(!before.is_ended());

    let err = h.executor.run_turn(&id, None).await.expect_err("limit");

    assert!(matches!(err, TutorError::TurnLimitReached { .. }));
    assert!(err.is_rejected_precondition());
    assert_eq!(h.executor.store().get(&id).expect("record stored"), before);
    assert_eq!(h.interlocutor.recorded_exchanges().len(), 2);
}

/// A turn number past the ceiling is clamped and ends the conversation.
#[tokio::test]
async fn test_turn_count_never_exceeds_max_turns() {
    let h = harness(3);
    let id = start(&h).await;
    h.interlocutor.queue_response(ExchangeResponse {
        student_reply: "skipping ahead".to_string(),
        turn_number: 99,
        is_complete: false,
        interaction_id: None,
    });

    let outcome = h.executor.run_turn(&id, None).await.expect("turn runs");

    assert_eq!(outcome.turn_count, 3);
    assert!(outcome.ended);
    let err = h.executor.run_turn(&id, None).await.expect_err("ended");
    assert!(matches!(err, TutorError::ConversationEnded { .. }));
}

/// Writing a record back unchanged is a no-op.
#[tokio::test]
async fn test_put_then_get_is_idempotent() {
    let h = harness(3);
    let id = start(&h).await;
    h.executor.run_turn(&id, None).await.expect("turn runs");

    let store = h.executor.store();
    let record = store.get(&id).expect("record stored");
    store.put(record.clone());
    store.put(record.clone());

    assert_eq!(store.get(&id).expect("record stored"), record);
    assert_eq!(store.len(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Concurrent turns on one conversation run one after the other.
#[tokio::test]
async fn test_same_conversation_turns_serialize() {
    let h = harness_with(ScriptedInterlocutor::new(5).with_delay(Duration::from_millis(30)));
    let id = start(&h).await;

    let (a, b) = tokio::join!(
        h.executor.run_turn(&id, Some("First question".to_string())),
        h.executor.run_turn(&id, Some("Second question".to_string())),
    );
    a.expect("first turn");
    b.expect("second turn");

    let record = h.executor.store().get(&id).expect("record stored");
    assert_eq!(record.turn_count(), 2);
    let roles: Vec<Role> = record.transcript().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![Role::Tutor, Role::Student, Role::Tutor, Role::Student]
    );
}

/// Different conversations advance independently.
#[tokio::test]
async fn test_independent_conversations_run_in_parallel() {
    let h = harness_with(ScriptedInterlocutor::new(2).with_delay(Duration::from_millis(10)));
    let first = start(&h).await;
    let second = start(&h).await;
    assert_ne!(first, second);

    let ids = [first, second];
    let results =
        futures::future::join_all(ids.iter().map(|id| h.executor.run_to_completion(id))).await;

    for result in results {
        let record = result.expect("conversation completes");
        assert_eq!(record.turn_count(), 2);
        assert!(record.is_ended());
    }
    assert_eq!(h.executor.store().len(), 2);
}

// ============================================================================
// Transcript log and report
// ============================================================================

/// Each turn appends a log line; the log feeds the report crate directly.
#[tokio::test]
async fn test_transcript_log_feeds_report() {
    let dir = temp_log_dir("report");
    let log = Arc::new(TranscriptLog::open(&dir).await.expect("log opens"));

    let oracle = Arc::new(ScriptedOracle::new());
    oracle.queue_reply(raw(json!({
        "level": 5,
        "confidence": 0.95,
        "evidence": "Already fluent",
        "should_lock": true
    })));
    let executor = TurnExecutor::from_config(
        &Config::default(),
        ConversationStore::new(),
        oracle,
        Arc::new(ScriptedGenerator::new()),
        Arc::new(ScriptedInterlocutor::new(2)),
    )
    .with_transcript_log(Arc::clone(&log));

    let id = executor
        .start_conversation("stu-9", "top-9", StudentProfile::default(), TopicInfo::default())
        .await
        .expect("conversation starts")
        .record
        .conversation_id()
        .to_string();
    executor.run_to_completion(&id).await.expect("completes");

    let entries = TranscriptLog::load_entries(log.path(), Some("stu-9"), None, None)
        .await
        .expect("log readable");
    assert_eq!(entries.len(), 2);
    // Newest first
    assert_eq!(entries[0].metadata.turn_count, 2);
    assert!(entries[0].metadata.conversation_ended);
    assert_eq!(entries[0].message_count, 4);
    assert_eq!(entries[1].metadata.turn_count, 1);

    let line = serde_json::to_value(&entries[0]).expect("entry serializes");
    let input: ReportInput = serde_json::from_value(line).expect("entry is report input");
    let report = ReportGenerator::new(&input).generate().expect("report builds");
    assert_eq!(report.summary.status, ReportStatus::Completed);
    assert_eq!(report.turns.len(), 2);
    assert_eq!(report.assessment.level, Some(5));
    assert!(report.assessment.locked);

    let _ = std::fs::remove_dir_all(&dir);
}
