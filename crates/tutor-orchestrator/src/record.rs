//! Conversation record types for the tutor loop.
//!
//! A [`ConversationRecord`] holds every piece of mutable state for one
//! tutoring conversation. Fields are private; all changes go through the
//! transition methods so the record invariants hold at every observable point:
//!
//! - `turn_count <= max_turns`
//! - `locked` implies an understanding level is set
//! - once `ended`, the transcript, turn count and lock no longer change

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TutorError};

// ============================================================================
// Transcript
// ============================================================================

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Message produced by the tutor.
    Tutor,
    /// Reply produced by the simulated student.
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tutor => write!(f, "tutor"),
            Self::Student => write!(f, "student"),
        }
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub text: String,
}

impl Turn {
    /// Creates a tutor entry.
    #[must_use]
    pub fn tutor(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tutor,
            text: text.into(),
        }
    }

    /// Creates a student entry.
    #[must_use]
    pub fn student(text: impl Into<String>) -> Self {
        Self {
            role: Role::Student,
            text: text.into(),
        }
    }

    /// Returns `true` if this entry came from the student.
    #[must_use]
    pub const fn is_student(&self) -> bool {
        matches!(self.role, Role::Student)
    }
}

// ============================================================================
// Profile and Topic
// ============================================================================

/// Descriptive data about the student, supplied at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    /// Display name.
    pub name: String,
    /// School grade.
    pub grade_level: u32,
}

/// Descriptive data about the topic, supplied at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Topic name, e.g. "Linear Equations".
    pub name: String,
    /// Owning subject id.
    pub subject_id: String,
    /// Owning subject name.
    pub subject_name: String,
    /// Grade the topic is taught at.
    pub grade_level: u32,
}

// ============================================================================
// UnderstandingLevel
// ============================================================================

/// A baseline understanding level in `1..=5`.
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::UnderstandingLevel;
///
/// assert_eq!(UnderstandingLevel::new(4).map(UnderstandingLevel::get), Some(4));
/// assert!(UnderstandingLevel::new(0).is_none());
/// assert!(UnderstandingLevel::new(6).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct UnderstandingLevel(u8);

impl UnderstandingLevel {
    /// Lowest level: struggling.
    pub const MIN: u8 = 1;
    /// Highest level: mastered.
    pub const MAX: u8 = 5;
    /// Level assumed when nothing better is known.
    pub const DEFAULT: Self = Self(3);

    /// Returns the level if `value` is within `1..=5`.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the level if `value` is an integer within `1..=5`.
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        u8::try_from(value).ok().and_then(Self::new)
    }

    /// Returns the numeric level.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for UnderstandingLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for UnderstandingLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("understanding level {value} is outside 1..=5"))
    }
}

impl From<UnderstandingLevel> for u8 {
    fn from(level: UnderstandingLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for UnderstandingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The assessment fields of a record, bundled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnderstandingEstimate {
    /// Estimated level, if any.
    pub level: Option<UnderstandingLevel>,
    /// Confidence in `[0.0, 1.0]`, if any.
    pub confidence: Option<f64>,
    /// Free-text justification.
    pub evidence: String,
}

// ============================================================================
// ConversationRecord
// ============================================================================

/// All mutable state of one tutoring conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRecord {
    conversation_id: String,
    student_id: String,
    topic_id: String,
    student_profile: StudentProfile,
    topic_info: TopicInfo,
    transcript: Vec<Turn>,
    turn_count: u32,
    max_turns: u32,
    understanding_level: Option<UnderstandingLevel>,
    confidence: Option<f64>,
    evidence: String,
    locked: bool,
    ended: bool,
    assessed_student_turns: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Creates a fresh, unassessed record with an empty transcript.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{ConversationRecord, StudentProfile, TopicInfo};
    ///
    /// let record = ConversationRecord::new(
    ///     "c1", "s1", "t1", 10,
    ///     StudentProfile::default(), TopicInfo::default(),
    /// );
    /// assert_eq!(record.turn_count(), 0);
    /// assert!(record.transcript().is_empty());
    /// assert!(!record.is_locked());
    /// assert!(!record.is_ended());
    /// ```
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        student_id: impl Into<String>,
        topic_id: impl Into<String>,
        max_turns: u32,
        student_profile: StudentProfile,
        topic_info: TopicInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            student_id: student_id.into(),
            topic_id: topic_id.into(),
            student_profile,
            topic_info,
            transcript: Vec::new(),
            turn_count: 0,
            max_turns,
            understanding_level: None,
            confidence: None,
            evidence: String::new(),
            locked: false,
            ended: false,
            assessed_student_turns: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Unique conversation id.
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Student id.
    #[must_use]
    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    /// Topic id.
    #[must_use]
    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Student profile supplied at creation.
    #[must_use]
    pub const fn student_profile(&self) -> &StudentProfile {
        &self.student_profile
    }

    /// Topic info supplied at creation.
    #[must_use]
    pub const fn topic_info(&self) -> &TopicInfo {
        &self.topic_info
    }

    /// Ordered transcript.
    #[must_use]
    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Turn number last reported by the interlocutor.
    #[must_use]
    pub const fn turn_count(&self) -> u32 {
        self.turn_count
    }

    /// Turn ceiling.
    #[must_use]
    pub const fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Current understanding level.
    #[must_use]
    pub const fn understanding_level(&self) -> Option<UnderstandingLevel> {
        self.understanding_level
    }

    /// Current confidence.
    #[must_use]
    pub const fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    /// Current evidence text.
    #[must_use]
    pub fn evidence(&self) -> &str {
        &self.evidence
    }

    /// Current assessment fields as one value.
    #[must_use]
    pub fn estimate(&self) -> UnderstandingEstimate {
        UnderstandingEstimate {
            level: self.understanding_level,
            confidence: self.confidence,
            evidence: self.evidence.clone(),
        }
    }

    /// Whether the assessment is frozen.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whether the conversation is over.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Number of student turns seen by the last applied assessment.
    #[must_use]
    pub const fn assessed_student_turns(&self) -> usize {
        self.assessed_student_turns
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last mutation.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Number of student entries in the transcript.
    #[must_use]
    pub fn student_turn_count(&self) -> usize {
        self.transcript.iter().filter(|t| t.is_student()).count()
    }

    /// Text of the most recent student entry.
    #[must_use]
    pub fn latest_student_turn(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|t| t.is_student())
            .map(|t| t.text.as_str())
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Overwrites the assessment fields unless the record is locked.
    ///
    /// Returns `Ok(false)` without changing anything when locked.
    /// `student_turns` is the number of student turns the estimate was
    /// derived from.
    pub fn apply_estimate(
        &mut self,
        estimate: UnderstandingEstimate,
        student_turns: usize,
    ) -> Result<bool> {
        if self.locked {
            return Ok(false);
        }
        if self.ended {
            return Err(TutorError::invalid_transition("ended", "assessed"));
        }

        self.understanding_level = estimate.level;
        self.confidence = estimate.confidence.map(|c| c.clamp(0.0, 1.0));
        self.evidence = estimate.evidence;
        self.assessed_student_turns = self.assessed_student_turns.max(student_turns);
        self.touch();
        Ok(true)
    }

    /// Freezes the assessment. Locking twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if no level is set or the conversation ended.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Ok(());
        }
        if self.ended {
            return Err(TutorError::invalid_transition("ended", "locked"));
        }
        if self.understanding_level.is_none() {
            return Err(TutorError::invalid_transition("unassessed", "locked"));
        }
        self.locked = true;
        self.touch();
        Ok(())
    }

    /// Appends one tutor/student exchange and advances the turn count.
    ///
    /// The reported turn number never moves the count backwards. A number
    /// above `max_turns` is clamped to the ceiling; the return value is `true`
    /// when that happened and the caller must end the conversation.
    ///
    /// # Errors
    ///
    /// Returns `ConversationEnded` if the record has already ended.
    pub fn record_exchange(
        &mut self,
        tutor_message: impl Into<String>,
        student_reply: impl Into<String>,
        turn_number: u32,
    ) -> Result<bool> {
        if self.ended {
            return Err(TutorError::conversation_ended(&self.conversation_id));
        }

        self.transcript.push(Turn::tutor(tutor_message));
        self.transcript.push(Turn::student(student_reply));

        let mut clamped = false;
        let mut next = self.turn_count.max(turn_number);
        if next > self.max_turns {
            warn!(
                conversation_id = %self.conversation_id,
                reported = turn_number,
                max_turns = self.max_turns,
                "Interlocutor turn number exceeds ceiling, clamping"
            );
            next = self.max_turns;
            clamped = true;
        }
        self.turn_count = next;
        self.touch();
        Ok(clamped)
    }

    /// Ends the conversation. Ending twice is a no-op.
    pub fn mark_ended(&mut self) {
        if !self.ended {
            self.ended = true;
            self.touch();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
