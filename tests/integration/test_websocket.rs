//! WebSocket event streaming over a real socket.
//!
//! The server is the full router on an ephemeral port; turns are driven
//! through the shared executor and observed with a tungstenite client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use tutor_orchestrator::testing::{ScriptedGenerator, ScriptedInterlocutor, ScriptedOracle};
use tutor_orchestrator::{
    create_router, AppState, Config, ConversationStore, StudentProfile, TopicInfo,
    TransportErrorKind, TurnExecutor, TutorError, TutorEvent,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Server {
    url: String,
    executor: Arc<TurnExecutor>,
    interlocutor: Arc<ScriptedInterlocutor>,
}

async fn spawn_server(max_turns: u32) -> Server {
    let interlocutor = Arc::new(ScriptedInterlocutor::new(max_turns));
    let executor = Arc::new(TurnExecutor::from_config(
        &Config::default(),
        ConversationStore::new(),
        Arc::new(ScriptedOracle::new()),
        Arc::new(ScriptedGenerator::new()),
        interlocutor.clone(),
    ));
    let router = create_router(AppState::new(
        Config::default(),
        Arc::clone(&executor),
        interlocutor.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server");
    });

    Server {
        url: format!("ws://{addr}/ws"),
        executor,
        interlocutor,
    }
}

async fn connect(url: &str) -> WsClient {
    let (stream, _) = connect_async(url).await.expect("connect");
    stream
}

/// Next event on the socket, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> TutorEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("event JSON"),
            Message::Ping(data) => client.send(Message::Pong(data)).await.expect("pong"),
            Message::Pong(_) => {}
            other => unreachable!("unexpected frame: {other:?}"),
        }
    }
}

async fn start(executor: &TurnExecutor, student_id: &str) -> String {
    executor
        .start_conversation(
            student_id,
            "top-1",
            StudentProfile::default(),
            TopicInfo::default(),
        )
        .await
        .expect("start")
        .record
        .conversation_id()
        .to_string()
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test]
async fn test_connected_event_on_empty_store() {
    let server = spawn_server(3).await;
    let mut client = connect(&server.url).await;

    match receive_event(&mut client).await {
        TutorEvent::Connected(payload) => assert!(payload.live_conversations.is_empty()),
        other => unreachable!("expected connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connected_event_lists_live_conversations() {
    let server = spawn_server(3).await;
    let id = start(&server.executor, "stu-1").await;

    let mut client = connect(&server.url).await;
    match receive_event(&mut client).await {
        TutorEvent::Connected(payload) => assert_eq!(payload.live_conversations, vec![id]),
        other => unreachable!("expected connected, got {other:?}"),
    }
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_conversation_events_stream_in_order() {
    let server = spawn_server(2).await;
    let mut client = connect(&server.url).await;
    receive_event(&mut client).await;

    let id = start(&server.executor, "stu-1").await;
    server
        .executor
        .run_to_completion(&id)
        .await
        .expect("completes");

    let mut events = Vec::new();
    loop {
        let event = receive_event(&mut client).await;
        let done = matches!(event, TutorEvent::ConversationEnded(_));
        events.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(
        &events[0],
        TutorEvent::ConversationStarted(p) if p.conversation_id == id && p.max_turns == 2
    ));
    let turns: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            TutorEvent::TurnCompleted(p) => Some(p.turn_number),
            _ => None,
        })
        .collect();
    assert_eq!(turns, vec![1, 2]);
    assert!(matches!(
        events.last(),
        Some(TutorEvent::ConversationEnded(p)) if p.turn_count == 2
    ));
}

#[tokio::test]
async fn test_events_reach_every_client() {
    let server = spawn_server(3).await;
    let mut first = connect(&server.url).await;
    let mut second = connect(&server.url).await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;

    let id = start(&server.executor, "stu-1").await;

    for client in [&mut first, &mut second] {
        assert!(matches!(
            receive_event(client).await,
            TutorEvent::ConversationStarted(p) if p.conversation_id == id
        ));
    }
}

#[tokio::test]
async fn test_failed_turn_emits_error_event() {
    let server = spawn_server(3).await;
    let mut client = connect(&server.url).await;
    receive_event(&mut client).await;

    let id = start(&server.executor, "stu-1").await;
    receive_event(&mut client).await;

    server
        .interlocutor
        .queue_error(TutorError::transport(TransportErrorKind::Network, "reset"));
    let err = server
        .executor
        .run_turn(&id, None)
        .await
        .expect_err("transport fails");
    assert!(err.is_retryable());

    match receive_event(&mut client).await {
        TutorEvent::Error(payload) => {
            assert_eq!(payload.conversation_id.as_deref(), Some(id.as_str()));
            assert!(payload.message.contains("reset"));
        }
        other => unreachable!("expected error, got {other:?}"),
    }
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let server = spawn_server(3).await;

    let mut leaving = connect(&server.url).await;
    receive_event(&mut leaving).await;
    leaving.close(None).await.expect("close");
    drop(leaving);

    let mut staying = connect(&server.url).await;
    receive_event(&mut staying).await;

    let id = start(&server.executor, "stu-2").await;
    assert!(matches!(
        receive_event(&mut staying).await,
        TutorEvent::ConversationStarted(p) if p.conversation_id == id
    ));
}
