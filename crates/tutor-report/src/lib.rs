//! Tutoring Report Generation
//!
//! Builds a [`ConversationReport`] from one finished (or abandoned) tutoring
//! conversation and renders it as JSON or Markdown.
//!
//! The input type [`ReportInput`] mirrors a transcript log line, so a line of
//! `conversations.jsonl` deserializes straight into it.
//!
//! # Types
//!
//! - [`ReportInput`] - Conversation snapshot the report is built from
//! - [`ConversationReport`] - The complete report
//! - [`ReportSummary`] - Conversation status and turn counts
//! - [`BaselineAssessment`] - Final understanding estimate
//! - [`TurnSummary`] - One tutor/student exchange
//! - [`TeachingStats`] - Aggregates over the tutor's messages
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{ReportGenerator, ReportInput, ReportRole, ReportTurn};
//! use tutor_report::json::JsonGenerator;
//!
//! let input = ReportInput {
//!     conversation_id: "c1".to_string(),
//!     messages: vec![
//!         ReportTurn::new(ReportRole::Tutor, "What is a fraction?"),
//!         ReportTurn::new(ReportRole::Student, "A part of a whole."),
//!     ],
//!     understanding_level: Some(3),
//!     ..Default::default()
//! };
//!
//! let report = ReportGenerator::new(&input).generate().unwrap();
//! assert_eq!(report.turns.len(), 1);
//!
//! let json = JsonGenerator::new(&report).generate_pretty().unwrap();
//! assert!(json.contains("\"conversation_id\": \"c1\""));
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tutor messages longer than this many characters count as substantial teaching.
pub const DEFAULT_SUBSTANTIAL_CHARS: usize = 100;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Input (local copies to avoid a dependency on the orchestrator)
// ============================================================================

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportRole {
    /// The tutor.
    Tutor,
    /// The simulated student.
    Student,
}

/// A transcript message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTurn {
    /// Who said it.
    pub role: ReportRole,
    /// What was said.
    pub text: String,
}

impl ReportTurn {
    /// Creates a message.
    #[must_use]
    pub fn new(role: ReportRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Student fields used by the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStudent {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// School grade.
    #[serde(default)]
    pub grade_level: u32,
}

/// Topic fields used by the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTopic {
    /// Topic name.
    #[serde(default)]
    pub name: String,
    /// Subject name.
    #[serde(default)]
    pub subject_name: String,
}

/// Turn bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Turns completed.
    #[serde(default)]
    pub turn_count: u32,
    /// Turn ceiling.
    #[serde(default)]
    pub max_turns: u32,
    /// Whether the conversation ended.
    #[serde(default)]
    pub conversation_ended: bool,
}

/// Snapshot of one conversation. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportInput {
    /// Conversation id.
    pub conversation_id: String,
    /// Student id.
    #[serde(default)]
    pub student_id: String,
    /// Topic id.
    #[serde(default)]
    pub topic_id: String,
    /// Student profile.
    #[serde(default)]
    pub student_profile: ReportStudent,
    /// Topic info.
    #[serde(default)]
    pub topic_info: ReportTopic,
    /// Full transcript, oldest first.
    #[serde(default)]
    pub messages: Vec<ReportTurn>,
    /// Final level, 1-5.
    #[serde(default)]
    pub understanding_level: Option<u8>,
    /// Final confidence.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Evidence behind the final estimate.
    #[serde(default)]
    pub evidence: String,
    /// Whether the estimate locked.
    #[serde(default)]
    pub locked: bool,
    /// Turn bookkeeping.
    #[serde(default)]
    pub metadata: ReportMetadata,
}

// ============================================================================
// Report Status
// ============================================================================

/// State of the conversation when the report was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Conversation can still take turns.
    #[default]
    InProgress,
    /// Conversation ended.
    Completed,
}

impl ReportStatus {
    /// Returns a human-readable description of the status.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Human-readable label for an understanding level.
#[must_use]
pub const fn level_label(level: u8) -> &'static str {
    match level {
        1 => "Struggling",
        2 => "Below grade",
        3 => "At grade",
        4 => "Above grade",
        5 => "Advanced",
        _ => "Unknown",
    }
}

// ============================================================================
// Report
// ============================================================================

/// Complete report for one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationReport {
    /// Conversation id.
    pub conversation_id: String,

    /// Student id.
    pub student_id: String,

    /// Topic id.
    pub topic_id: String,

    /// Student name and grade.
    pub student: ReportStudent,

    /// Topic and subject.
    pub topic: ReportTopic,

    /// Status and turn counts.
    pub summary: ReportSummary,

    /// Final baseline estimate.
    pub assessment: BaselineAssessment,

    /// One entry per exchange.
    pub turns: Vec<TurnSummary>,

    /// Aggregates over the tutor's messages.
    pub teaching: TeachingStats,

    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl ConversationReport {
    /// Serializes the report to JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }
}

/// Status and turn counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Final status.
    pub status: ReportStatus,

    /// Turns completed.
    pub turn_count: u32,

    /// Turn ceiling.
    pub max_turns: u32,

    /// Transcript length.
    pub message_count: usize,
}

/// Final understanding estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineAssessment {
    /// Level 1-5, if the conversation was ever assessed.
    pub level: Option<u8>,

    /// Label for `level`.
    pub label: String,

    /// Confidence in `[0, 1]`.
    pub confidence: Option<f64>,

    /// Whether the estimate was frozen.
    pub locked: bool,

    /// Evidence behind the estimate.
    pub evidence: String,
}

/// One tutor/student exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSummary {
    /// 1-based turn number.
    pub turn: u32,

    /// What the tutor sent.
    pub tutor_message: String,

    /// What the student replied, if the reply was recorded.
    pub student_reply: Option<String>,

    /// Whether the tutor message counts as substantial teaching.
    pub substantial: bool,
}

/// Aggregates over the tutor's messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TeachingStats {
    /// Tutor messages sent.
    pub tutor_messages: usize,

    /// Student replies received.
    pub student_replies: usize,

    /// Tutor messages above the substantial-teaching threshold.
    pub substantial_messages: usize,

    /// Tutor messages that ask a question.
    pub questions_asked: usize,

    /// Mean tutor message length in characters.
    pub avg_tutor_chars: f64,

    /// Mean student reply length in characters.
    pub avg_student_chars: f64,
}

// ============================================================================
// ReportGenerator
// ============================================================================

/// Builds a [`ConversationReport`] from a [`ReportInput`].
#[derive(Debug, Clone)]
pub struct ReportGenerator<'a> {
    input: &'a ReportInput,
    substantial_chars: usize,
}

impl<'a> ReportGenerator<'a> {
    /// Creates a generator using [`DEFAULT_SUBSTANTIAL_CHARS`].
    #[must_use]
    pub const fn new(input: &'a ReportInput) -> Self {
        Self {
            input,
            substantial_chars: DEFAULT_SUBSTANTIAL_CHARS,
        }
    }

    /// Overrides the substantial-teaching threshold.
    #[must_use]
    pub const fn substantial_chars(mut self, chars: usize) -> Self {
        self.substantial_chars = chars;
        self
    }

    /// Builds the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the conversation id is empty or
    /// the level is outside 1-5.
    pub fn generate(&self) -> Result<ConversationReport> {
        let input = self.input;
        if input.conversation_id.trim().is_empty() {
            return Err(ReportError::InvalidData(
                "conversation_id is required".to_string(),
            ));
        }
        if let Some(level) = input.understanding_level {
            if !(1..=5).contains(&level) {
                return Err(ReportError::InvalidData(format!(
                    "understanding level {level} is outside 1-5"
                )));
            }
        }

        let turns = self.turn_summaries();
        let status = if input.metadata.conversation_ended {
            ReportStatus::Completed
        } else {
            ReportStatus::InProgress
        };

        Ok(ConversationReport {
            conversation_id: input.conversation_id.clone(),
            student_id: input.student_id.clone(),
            topic_id: input.topic_id.clone(),
            student: input.student_profile.clone(),
            topic: input.topic_info.clone(),
            summary: ReportSummary {
                status,
                turn_count: input.metadata.turn_count,
                max_turns: input.metadata.max_turns,
                message_count: input.messages.len(),
            },
            assessment: BaselineAssessment {
                level: input.understanding_level,
                label: input
                    .understanding_level
                    .map_or("Not assessed", level_label)
                    .to_string(),
                confidence: input.confidence,
                locked: input.locked,
                evidence: input.evidence.clone(),
            },
            teaching: self.teaching_stats(&turns),
            turns,
            generated_at: Utc::now(),
        })
    }

    fn is_substantial(&self, text: &str) -> bool {
        text.chars().count() > self.substantial_chars
    }

    /// Pairs each tutor message with the student reply that follows it.
    fn turn_summaries(&self) -> Vec<TurnSummary> {
        let mut turns: Vec<TurnSummary> = Vec::new();

        for message in &self.input.messages {
            match message.role {
                ReportRole::Tutor => {
                    let turn = u32::try_from(turns.len() + 1).unwrap_or(u32::MAX);
                    turns.push(TurnSummary {
                        turn,
                        tutor_message: message.text.clone(),
                        student_reply: None,
                        substantial: self.is_substantial(&message.text),
                    });
                }
                ReportRole::Student => {
                    if let Some(last) = turns.last_mut().filter(|t| t.student_reply.is_none()) {
                        last.student_reply = Some(message.text.clone());
                    }
                }
            }
        }

        turns
    }

    fn teaching_stats(&self, turns: &[TurnSummary]) -> TeachingStats {
        let student_lengths: Vec<usize> = self
            .input
            .messages
            .iter()
            .filter(|m| m.role == ReportRole::Student)
            .map(|m| m.text.chars().count())
            .collect();
        let tutor_lengths: Vec<usize> = turns
            .iter()
            .map(|t| t.tutor_message.chars().count())
            .collect();

        TeachingStats {
            tutor_messages: turns.len(),
            student_replies: student_lengths.len(),
            substantial_messages: turns.iter().filter(|t| t.substantial).count(),
            questions_asked: turns
                .iter()
                .filter(|t| t.tutor_message.contains('?'))
                .count(),
            avg_tutor_chars: mean(&tutor_lengths),
            avg_student_chars: mean(&student_lengths),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<usize>() as f64 / values.len() as f64
}

// ============================================================================
// Tests
// ============================================================================
