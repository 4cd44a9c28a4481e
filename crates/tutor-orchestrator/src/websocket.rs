//! WebSocket event types and broadcasting for live conversation observation.
//!
//! Events are broadcast to every connected client as conversations start,
//! complete turns, lock their assessment and end.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, lists live conversations
//! - `conversation_started` - A conversation was registered
//! - `turn_completed` - One turn finished and was persisted
//! - `assessment_locked` - A conversation's baseline level was frozen
//! - `conversation_ended` - A conversation reached a terminal state
//! - `error` - A turn failed
//!
//! # Example
//!
//! ```no_run
//! use tutor_orchestrator::websocket::{EventBroadcaster, TutorEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(TutorEvent::connected(vec!["conv-1".to_string()]));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::record::{ConversationRecord, UnderstandingLevel};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Ids of the conversations currently in the store.
    pub live_conversations: Vec<String>,
}

/// Payload for the `conversation_started` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStartedPayload {
    /// New conversation id.
    pub conversation_id: String,
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
    /// Turn ceiling.
    pub max_turns: u32,
}

/// Payload for the `turn_completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnCompletedPayload {
    /// Conversation id.
    pub conversation_id: String,
    /// Turn count after this turn.
    pub turn_number: u32,
    /// Level after this turn.
    pub understanding_level: Option<UnderstandingLevel>,
    /// Confidence after this turn.
    pub confidence: Option<f64>,
    /// Whether the assessment is locked.
    pub locked: bool,
    /// Whether the conversation ended.
    pub ended: bool,
}

/// Payload for the `assessment_locked` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentLockedPayload {
    /// Conversation id.
    pub conversation_id: String,
    /// Frozen level.
    pub level: UnderstandingLevel,
    /// Confidence at the time of locking.
    pub confidence: Option<f64>,
}

/// Payload for the `conversation_ended` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEndedPayload {
    /// Conversation id.
    pub conversation_id: String,
    /// Final turn count.
    pub turn_count: u32,
    /// Final level.
    pub understanding_level: Option<UnderstandingLevel>,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Conversation the error belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// WebSocket event types for conversation observation.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TutorEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent when a conversation is registered.
    ConversationStarted(ConversationStartedPayload),
    /// Sent after every persisted turn.
    TurnCompleted(TurnCompletedPayload),
    /// Sent when an assessment locks.
    AssessmentLocked(AssessmentLockedPayload),
    /// Sent when a conversation ends.
    ConversationEnded(ConversationEndedPayload),
    /// Sent when a turn fails.
    Error(ErrorPayload),
}

impl TutorEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(live_conversations: Vec<String>) -> Self {
        Self::Connected(ConnectedPayload { live_conversations })
    }

    /// Creates a `ConversationStarted` event for a fresh record.
    #[must_use]
    pub fn conversation_started(record: &ConversationRecord) -> Self {
        Self::ConversationStarted(ConversationStartedPayload {
            conversation_id: record.conversation_id().to_string(),
            student_id: record.student_id().to_string(),
            topic_id: record.topic_id().to_string(),
            max_turns: record.max_turns(),
        })
    }

    /// Creates a `TurnCompleted` event from the persisted record.
    #[must_use]
    pub fn turn_completed(record: &ConversationRecord) -> Self {
        Self::TurnCompleted(TurnCompletedPayload {
            conversation_id: record.conversation_id().to_string(),
            turn_number: record.turn_count(),
            understanding_level: record.understanding_level(),
            confidence: record.confidence(),
            locked: record.is_locked(),
            ended: record.is_ended(),
        })
    }

    /// Creates an `AssessmentLocked` event.
    #[must_use]
    pub fn assessment_locked(conversation_id: &str, level: UnderstandingLevel, confidence: Option<f64>) -> Self {
        Self::AssessmentLocked(AssessmentLockedPayload {
            conversation_id: conversation_id.to_string(),
            level,
            confidence,
        })
    }

    /// Creates a `ConversationEnded` event from the final record.
    #[must_use]
    pub fn conversation_ended(record: &ConversationRecord) -> Self {
        Self::ConversationEnded(ConversationEndedPayload {
            conversation_id: record.conversation_id().to_string(),
            turn_count: record.turn_count(),
            understanding_level: record.understanding_level(),
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(conversation_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            conversation_id: conversation_id.map(str::to_string),
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::ConversationStarted(_) => "conversation_started",
            Self::TurnCompleted(_) => "turn_completed",
            Self::AssessmentLocked(_) => "assessment_locked",
            Self::ConversationEnded(_) => "conversation_ended",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts tutor events to all subscribers.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<TutorEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives `Lagged` and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TutorEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will receive it.
    pub fn send(&self, event: TutorEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Event stream upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(event: &TutorEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Serves one observer.
///
/// - Sends `connected` with the live conversation ids
/// - Forwards every broadcast event
/// - Pings every 30 seconds, closing after 3 missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the greeting so no event slips between the two
    let mut events = state.executor.events().subscribe();

    let live = state.executor.store().ids();
    let live_count = live.len();
    let Some(greeting) = encode(&TutorEvent::connected(live)) else {
        return;
    };
    if sender.send(Message::Text(greeting)).await.is_err() {
        debug!("Observer left before the greeting");
        return;
    }

    info!(
        live_conversations = live_count,
        observers = state.executor.events().receiver_count(),
        "Event observer connected"
    );

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let mut missed_pongs = 0u8;
    let mut forwarded = 0usize;

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    debug!("Observers are read-only, ignoring inbound frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "Observer socket error");
                    break;
                }
            },

            event = events.recv() => match event {
                Ok(event) => {
                    let Some(json) = encode(&event) else { continue };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = heartbeat.tick() => {
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(missed_pongs, "Observer stopped answering pings");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                missed_pongs += 1;
            }
        }
    }

    info!(forwarded, "Event observer disconnected");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::{StudentProfile, TopicInfo};

    fn record() -> ConversationRecord {
        ConversationRecord::new(
            "conv-7",
            "stu-1",
            "top-2",
            6,
            StudentProfile::default(),
            TopicInfo::default(),
        )
    }

    #[test]
    fn test_connected_event_serialization() {
        let event = TutorEvent::connected(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"connected""#));
        assert!(json.contains(r#""live_conversations":["a","b"]"#));
    }

    #[test]
    fn test_turn_completed_event_serialization() {
        let mut r = record();
        r.record_exchange("hi", "hey", 1).unwrap();
        let json = serde_json::to_string(&TutorEvent::turn_completed(&r)).unwrap();

        assert!(json.contains(r#""event":"turn_completed""#));
        assert!(json.contains(r#""conversation_id":"conv-7""#));
        assert!(json.contains(r#""turn_number":1"#));
        assert!(json.contains(r#""understanding_level":null"#));
        assert!(json.contains(r#""locked":false"#));
    }

    #[test]
    fn test_assessment_locked_event_serialization() {
        let event =
            TutorEvent::assessment_locked("conv-7", UnderstandingLevel::new(4).unwrap(), Some(0.8));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"assessment_locked""#));
        assert!(json.contains(r#""level":4"#));
    }

    #[test]
    fn test_error_event_omits_missing_conversation() {
        let json = serde_json::to_string(&TutorEvent::error(None, "boom")).unwrap();
        assert_eq!(json, r#"{"event":"error","payload":{"message":"boom"}}"#);
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"event":"conversation_ended","payload":{"conversation_id":"c","turn_count":5,"understanding_level":2}}"#;
        let event: TutorEvent = serde_json::from_str(json).unwrap();

        assert!(matches!(event, TutorEvent::ConversationEnded(_)));

        if let TutorEvent::ConversationEnded(payload) = event {
            assert_eq!(payload.turn_count, 5);
            assert_eq!(payload.understanding_level.map(UnderstandingLevel::get), Some(2));
        }
    }

    #[test]
    fn test_event_names() {
        let r = record();
        assert_eq!(TutorEvent::connected(Vec::new()).event_name(), "connected");
        assert_eq!(
            TutorEvent::conversation_started(&r).event_name(),
            "conversation_started"
        );
        assert_eq!(TutorEvent::turn_completed(&r).event_name(), "turn_completed");
        assert_eq!(
            TutorEvent::conversation_ended(&r).event_name(),
            "conversation_ended"
        );
        assert_eq!(TutorEvent::error(Some("c"), "x").event_name(), "error");
    }

    #[tokio::test]
    async fn test_broadcaster_send_receive() {
        let broadcaster = EventBroadcaster::new(10);
        let mut receiver = broadcaster.subscribe();

        assert_eq!(broadcaster.send(TutorEvent::turn_completed(&record())), 1);
        let event = receiver.recv().await.unwrap();
        assert!(matches!(event, TutorEvent::TurnCompleted(_)));
    }

    #[tokio::test]
    async fn test_broadcaster_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new(10);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        assert_eq!(broadcaster.send(TutorEvent::error(None, "test")), 2);
        assert!(matches!(first.recv().await.unwrap(), TutorEvent::Error(_)));
        assert!(matches!(second.recv().await.unwrap(), TutorEvent::Error(_)));
    }

    #[test]
    fn test_broadcaster_no_subscribers() {
        let broadcaster = EventBroadcaster::default();
        assert_eq!(broadcaster.send(TutorEvent::connected(Vec::new())), 0);
        assert_eq!(broadcaster.receiver_count(), 0);
    }
}
