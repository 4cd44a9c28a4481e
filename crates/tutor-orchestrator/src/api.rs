//! HTTP API for driving tutoring conversations.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /api/tutor/start` - Start a conversation for a student/topic pair
//! - `POST /api/tutor/interact` - Run one turn
//! - `GET /api/conversations/:id` - Fetch a live conversation record
//! - `DELETE /api/conversations/:id` - Evict a conversation
//! - `GET /ws` - WebSocket event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tutor_orchestrator::{create_router, AppState, Catalog, Config, TurnExecutor};
//!
//! # async fn example(executor: TurnExecutor, catalog: Arc<dyn Catalog>) {
//! let state = AppState::new(Config::default(), Arc::new(executor), catalog);
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::TutorError;
use crate::executor::TurnExecutor;
use crate::interlocutor::Catalog;
use crate::record::{ConversationRecord, UnderstandingLevel};
use crate::websocket::ws_handler;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/tutor/start`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
}

/// Response body for `POST /api/tutor/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    /// New conversation id.
    pub conversation_id: String,
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
    /// Turn ceiling.
    pub max_turns: u32,
    /// Conversations left in the interlocutor quota.
    pub conversations_remaining: Option<u32>,
}

/// Request body for `POST /api/tutor/interact`.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractRequest {
    /// Conversation to advance.
    pub conversation_id: String,
    /// Message to send verbatim instead of a generated one.
    #[serde(default)]
    pub tutor_message: Option<String>,
}

/// Response body for `POST /api/tutor/interact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractResponse {
    /// Conversation id.
    pub conversation_id: String,
    /// Message that was sent.
    pub tutor_message: String,
    /// What the student replied.
    pub student_response: String,
    /// Turn count after this turn.
    pub turn_number: u32,
    /// Whether the conversation is over.
    pub is_complete: bool,
    /// Level after this turn.
    pub understanding_level: Option<UnderstandingLevel>,
    /// Confidence after this turn.
    pub confidence: Option<f64>,
    /// Whether the assessment is locked.
    pub locked: bool,
}

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok".
    pub status: String,
    /// Number of conversations in the store.
    pub live_conversations: usize,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Configuration the server was started with.
    pub config: Config,
    /// The turn executor (owns the store and the event broadcaster).
    pub executor: Arc<TurnExecutor>,
    /// Student/topic catalog used to resolve profiles.
    pub catalog: Arc<dyn Catalog>,
}

impl AppState {
    /// Creates a new `AppState`.
    #[must_use]
    pub fn new(config: Config, executor: Arc<TurnExecutor>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            config,
            executor,
            catalog,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error type for API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// The request itself is invalid.
    BadRequest(String),
    /// The operation failed.
    Tutor(TutorError),
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self::Tutor(err)
    }
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Tutor(err) => match err {
                TutorError::NotFound { .. } => StatusCode::NOT_FOUND,
                TutorError::AlreadyExists { .. } => StatusCode::CONFLICT,
                TutorError::ConversationEnded { .. }
                | TutorError::TurnLimitReached { .. }
                | TutorError::ConfigValidationError { .. } => StatusCode::BAD_REQUEST,
                TutorError::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::BadRequest(msg) => msg,
            Self::Tutor(err) => {
                if status.is_server_error() {
                    error!(error = %err, "Request failed");
                }
                err.to_string()
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries:
/// - All API routes under `/api`
/// - `/health` and the `/ws` event stream at the root
/// - Permissive CORS and request tracing middleware
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/tutor/start", post(handle_start))
        .route("/tutor/interact", post(handle_interact))
        .route(
            "/conversations/:id",
            get(handle_get_conversation).delete(handle_delete_conversation),
        );

    Router::new()
        .route("/health", get(handle_health))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        live_conversations: state.executor.store().len(),
    })
}

/// Handler for `POST /api/tutor/start`.
async fn handle_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    if request.student_id.trim().is_empty() || request.topic_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "student_id and topic_id are required".to_string(),
        ));
    }

    info!(
        student_id = %request.student_id,
        topic_id = %request.topic_id,
        "Received start request"
    );

    let profile = state.catalog.student_profile(&request.student_id).await?;
    let topic = state.catalog.topic_info(&request.topic_id).await?;
    let session = state
        .executor
        .start_conversation(&request.student_id, &request.topic_id, profile, topic)
        .await?;

    Ok(Json(StartResponse {
        conversation_id: session.record.conversation_id().to_string(),
        student_id: request.student_id,
        topic_id: request.topic_id,
        max_turns: session.record.max_turns(),
        conversations_remaining: session.remaining_quota,
    }))
}

/// Handler for `POST /api/tutor/interact`.
async fn handle_interact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InteractRequest>,
) -> Result<Json<InteractResponse>, ApiError> {
    let explicit = request
        .tutor_message
        .filter(|message| !message.trim().is_empty());

    let outcome = state
        .executor
        .run_turn(&request.conversation_id, explicit)
        .await
        .map_err(|err| {
            if err.is_rejected_precondition() {
                warn!(
                    conversation_id = %request.conversation_id,
                    error = %err,
                    "Turn rejected"
                );
            }
            ApiError::from(err)
        })?;

    Ok(Json(InteractResponse {
        conversation_id: outcome.conversation_id,
        tutor_message: outcome.tutor_message,
        student_response: outcome.student_reply,
        turn_number: outcome.turn_count,
        is_complete: outcome.ended,
        understanding_level: outcome.understanding_level,
        confidence: outcome.confidence,
        locked: outcome.locked,
    }))
}

/// Handler for `GET /api/conversations/:id`.
async fn handle_get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationRecord>, ApiError> {
    Ok(Json(state.executor.store().get(&id)?))
}

/// Handler for `DELETE /api/conversations/:id`.
async fn handle_delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .executor
        .store()
        .evict(&id)
        .map(|_| {
            info!(conversation_id = %id, "Conversation evicted");
            StatusCode::NO_CONTENT
        })
        .ok_or_else(|| ApiError::from(TutorError::not_found(id)))
}

// ============================================================================
// Tests
// ============================================================================
