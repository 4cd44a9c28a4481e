//! Error types for the tutor loop orchestrator.
//!
//! This module defines the error hierarchy for all orchestrator operations,
//! including configuration loading, conversation lookup, turn preconditions,
//! interlocutor transport and the fallible reasoning capabilities.

use std::path::PathBuf;
use std::time::Duration;

/// A specialized `Result` type for tutor orchestrator operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while running tutoring conversations.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help operators resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// No live conversation is registered under this id.
    #[error("Conversation not found: '{conversation_id}'")]
    NotFound {
        /// The unknown conversation id.
        conversation_id: String,
    },

    /// A conversation with this id is already registered.
    #[error("Conversation already exists: '{conversation_id}'")]
    AlreadyExists {
        /// The duplicate conversation id.
        conversation_id: String,
    },

    // ========================================================================
    // Turn Precondition Errors
    // ========================================================================
    /// The conversation has ended and accepts no further turns.
    #[error("Conversation '{conversation_id}' has ended")]
    ConversationEnded {
        /// The ended conversation.
        conversation_id: String,
    },

    /// The conversation has used all of its turns.
    #[error("Conversation '{conversation_id}' reached its turn limit ({max_turns})")]
    TurnLimitReached {
        /// The exhausted conversation.
        conversation_id: String,
        /// The turn ceiling that was reached.
        max_turns: u32,
    },

    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// The assessment oracle or teaching generator could not produce a result.
    ///
    /// Recovered locally with fallback values; only ever logged.
    #[error("{capability} capability unavailable: {source}")]
    CapabilityUnavailable {
        /// Which capability failed ("assessment" or "teaching").
        capability: &'static str,
        /// The underlying capability failure.
        source: CapabilityError,
    },

    // ========================================================================
    // Interlocutor Errors
    // ========================================================================
    /// The exchange with the student interlocutor failed.
    ///
    /// The conversation record is left unchanged so the turn may be retried.
    #[error("Interlocutor transport failure ({kind}): {message}\n\nSuggestion: {suggestion}")]
    TransportFailure {
        /// Classification of the failure.
        kind: TransportErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid record transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

/// Categories of interlocutor transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call did not finish within its deadline.
    Timeout,
    /// The service answered with a non-2xx status.
    Status(u16),
    /// Network connectivity issues.
    Network,
    /// The response body could not be decoded.
    Decode,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Status(code) => write!(f, "status {code}"),
            Self::Network => write!(f, "network"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

impl TransportErrorKind {
    /// Returns a suggestion message for this failure kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout => "Retry the turn; the student service may be slow",
            Self::Status(401 | 403) => "Check the interlocutor API key",
            Self::Status(429) => "Wait and retry, or reduce request frequency",
            Self::Status(_) => "Retry later; the student service may be experiencing issues",
            Self::Network => "Check your network connection and the interlocutor base URL",
            Self::Decode => "Check that the interlocutor base URL points at the student service",
        }
    }
}

/// Classification of capability failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// The call exceeded its deadline.
    Timeout,
    /// The request could not be delivered.
    Transport,
    /// The backend answered with a non-2xx status.
    Status,
    /// The backend answered with something unusable.
    Malformed,
}

impl std::fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::Status => write!(f, "status"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

/// Failure reported by an assessment oracle or teaching generator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CapabilityError {
    /// Failure classification.
    pub kind: CapabilityErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl CapabilityError {
    /// Creates a new `CapabilityError`.
    #[must_use]
    pub fn new(kind: CapabilityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a timeout error for a call bounded by `limit`.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            CapabilityErrorKind::Timeout,
            format!("no response within {}s", limit.as_secs()),
        )
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Transport, message)
    }

    /// Creates a malformed-response error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CapabilityErrorKind::Malformed, message)
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(conversation_id: impl Into<String>) -> Self {
        Self::NotFound {
            conversation_id: conversation_id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(conversation_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            conversation_id: conversation_id.into(),
        }
    }

    /// Creates a new `ConversationEnded` error.
    #[must_use]
    pub fn conversation_ended(conversation_id: impl Into<String>) -> Self {
        Self::ConversationEnded {
            conversation_id: conversation_id.into(),
        }
    }

    /// Creates a new `TurnLimitReached` error.
    #[must_use]
    pub fn turn_limit(conversation_id: impl Into<String>, max_turns: u32) -> Self {
        Self::TurnLimitReached {
            conversation_id: conversation_id.into(),
            max_turns,
        }
    }

    /// Creates a new `CapabilityUnavailable` error.
    #[must_use]
    pub const fn capability(capability: &'static str, source: CapabilityError) -> Self {
        Self::CapabilityUnavailable { capability, source }
    }

    /// Creates a new `TransportFailure` with automatic suggestion based on kind.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::TransportFailure {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if the failed operation may be retried unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    /// Returns `true` if this error rejects a turn because of the record's state.
    #[must_use]
    pub const fn is_rejected_precondition(&self) -> bool {
        matches!(
            self,
            Self::ConversationEnded { .. } | Self::TurnLimitReached { .. }
        )
    }
}
