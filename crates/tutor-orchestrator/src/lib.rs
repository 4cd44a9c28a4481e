//! Adaptive Tutor Orchestrator
//!
//! Drives tutoring conversations against a remote simulated student: each
//! turn composes a tutor message, exchanges it, and re-estimates the
//! student's baseline understanding until the estimate locks or the
//! conversation ends. Also hosts the HTTP API and WebSocket events.

pub mod api;
pub mod assessment;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod interlocutor;
pub mod llm;
pub mod policy;
pub mod prompts;
pub mod record;
pub mod store;
pub mod teaching;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transcript_log;
pub mod websocket;

pub use api::{
    create_router, ApiError, AppState, ErrorResponse, HealthResponse, InteractRequest,
    InteractResponse, StartRequest, StartResponse,
};
pub use assessment::{
    AssessmentOracle, AssessmentOutcome, AssessmentRequest, AssessmentSource, Assessor,
    RawAssessment,
};
pub use batch::{collect_pairs, run_batch, BatchOutcome, BatchPair};
pub use config::{AssessmentConfig, Config, InterlocutorConfig, LlmConfig, TimeoutConfig};
pub use error::{CapabilityError, CapabilityErrorKind, Result, TransportErrorKind, TutorError};
pub use executor::{StartedSession, TurnExecutor, TurnOutcome, TurnPhase};
pub use interlocutor::{
    Catalog, ExchangeResponse, HttpInterlocutor, Interlocutor, MseResult, Prediction, SetType,
    StartedConversation, Student, Topic, TutoringEvaluation,
};
pub use llm::{LlmGenerator, LlmOracle, OpenAiChat};
pub use policy::{ensure_turn_allowed, is_terminal, should_assess, AssessmentPolicy, BaselineWindow};
pub use record::{
    ConversationRecord, Role, StudentProfile, TopicInfo, Turn, UnderstandingEstimate,
    UnderstandingLevel,
};
pub use store::{ConversationStore, TurnGuard};
pub use teaching::{fallback_greeting, Teacher, TeachingGenerator, TeachingRequest, TeachingStyle};
pub use transcript_log::{EntryMetadata, TranscriptEntry, TranscriptLog, LOG_FILE_NAME};
pub use websocket::{EventBroadcaster, TutorEvent};
