//! Teaching message generation.
//!
//! [`TeachingGenerator`] is the seam to the backend that writes tutor
//! messages. [`Teacher`] picks the teaching style for the record's level,
//! bounds the call with a deadline and replaces any failure with a fixed
//! greeting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::error::{CapabilityError, TutorError};
use crate::record::{ConversationRecord, StudentProfile, TopicInfo, Turn, UnderstandingLevel};

// ============================================================================
// TeachingStyle
// ============================================================================

/// One of five fixed teaching profiles, keyed by understanding level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeachingStyle {
    /// Level 1.
    Struggling,
    /// Level 2.
    BelowGrade,
    /// Level 3.
    AtGrade,
    /// Level 4.
    AboveGrade,
    /// Level 5.
    Advanced,
}

impl TeachingStyle {
    /// Style for a level; unset levels use the at-grade profile.
    #[must_use]
    pub fn for_level(level: Option<UnderstandingLevel>) -> Self {
        match level.map_or(3, UnderstandingLevel::get) {
            1 => Self::Struggling,
            2 => Self::BelowGrade,
            4 => Self::AboveGrade,
            5 => Self::Advanced,
            _ => Self::AtGrade,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Struggling => "Struggling",
            Self::BelowGrade => "Below Grade",
            Self::AtGrade => "At Grade",
            Self::AboveGrade => "Above Grade",
            Self::Advanced => "Advanced",
        }
    }

    /// Bullet-point guidance handed to the generator.
    #[must_use]
    pub const fn guidance(self) -> &'static str {
        match self {
            Self::Struggling => {
                "- Start from the fundamentals\n\
                 - Keep the language simple and clear\n\
                 - Split every idea into very small steps\n\
                 - Give many examples and analogies\n\
                 - Stay encouraging and supportive\n\
                 - Check understanding often\n\
                 - Avoid advanced terminology"
            }
            Self::BelowGrade => {
                "- Revisit the foundational concepts\n\
                 - Prefer concrete examples\n\
                 - Guide step by step\n\
                 - Offer extra practice\n\
                 - Give supportive but clear feedback\n\
                 - Build confidence gradually"
            }
            Self::AtGrade => {
                "- Present the core concepts clearly\n\
                 - Use grade-appropriate examples\n\
                 - Encourage independent thinking\n\
                 - Offer a moderate challenge\n\
                 - Balance praise and correction\n\
                 - Connect to prior knowledge"
            }
            Self::AboveGrade => {
                "- Introduce more complex ideas\n\
                 - Encourage deeper exploration\n\
                 - Use more abstract examples\n\
                 - Pose advanced problems\n\
                 - Foster critical thinking\n\
                 - Link to broader applications"
            }
            Self::Advanced => {
                "- Work with advanced material\n\
                 - Let the student explore independently\n\
                 - Use sophisticated examples\n\
                 - Pose complex, open problems\n\
                 - Foster creative problem solving\n\
                 - Link to real-world applications"
            }
        }
    }
}

// ============================================================================
// Generator seam
// ============================================================================

/// Input handed to a generator.
#[derive(Debug, Clone, Serialize)]
pub struct TeachingRequest {
    /// Full transcript so far.
    pub transcript: Vec<Turn>,
    /// Who the student is.
    pub student_profile: StudentProfile,
    /// What is being taught.
    pub topic_info: TopicInfo,
    /// Level to teach at.
    pub level: UnderstandingLevel,
    /// Style profile for `level`.
    pub style: TeachingStyle,
    /// Most recent student reply, if any.
    pub latest_student_turn: Option<String>,
    /// Set when the student has not spoken yet.
    pub is_opener: bool,
}

impl TeachingRequest {
    /// Builds the request for the next tutor message of `record`.
    #[must_use]
    pub fn from_record(record: &ConversationRecord) -> Self {
        let latest_student_turn = record.latest_student_turn().map(str::to_string);
        Self {
            transcript: record.transcript().to_vec(),
            student_profile: record.student_profile().clone(),
            topic_info: record.topic_info().clone(),
            level: record.understanding_level().unwrap_or_default(),
            style: TeachingStyle::for_level(record.understanding_level()),
            is_opener: latest_student_turn.is_none(),
            latest_student_turn,
        }
    }
}

/// Writes tutor messages.
#[async_trait]
pub trait TeachingGenerator: Send + Sync {
    /// Generates the next tutor message.
    async fn generate(
        &self,
        request: &TeachingRequest,
    ) -> std::result::Result<String, CapabilityError>;
}

// ============================================================================
// Teacher
// ============================================================================

/// Greeting used whenever generation fails.
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::{fallback_greeting, TopicInfo};
///
/// let topic = TopicInfo { name: "Fractions".to_string(), ..Default::default() };
/// assert_eq!(
///     fallback_greeting(&topic),
///     "Hello! Let's work on Fractions together. Can you tell me what you already know about it?"
/// );
/// ```
#[must_use]
pub fn fallback_greeting(topic: &TopicInfo) -> String {
    let name = if topic.name.trim().is_empty() {
        "this topic"
    } else {
        topic.name.as_str()
    };
    format!("Hello! Let's work on {name} together. Can you tell me what you already know about it?")
}

/// Runs a generator with deadline and fallback.
pub struct Teacher {
    generator: Arc<dyn TeachingGenerator>,
    timeout: Duration,
}

impl Teacher {
    /// Creates a teacher around `generator`.
    pub fn new(generator: Arc<dyn TeachingGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Produces the next tutor message for `record`. Never fails.
    pub async fn compose(&self, record: &ConversationRecord) -> String {
        let request = TeachingRequest::from_record(record);

        let reply = match tokio::time::timeout(self.timeout, self.generator.generate(&request)).await
        {
            Ok(reply) => reply,
            Err(_) => Err(CapabilityError::timeout(self.timeout)),
        };

        match reply {
            Ok(message) if !message.trim().is_empty() => message,
            Ok(_) => {
                warn!(
                    conversation_id = %record.conversation_id(),
                    "Teaching generator returned an empty message, using fallback greeting"
                );
                fallback_greeting(record.topic_info())
            }
            Err(source) => {
                let err = TutorError::capability("teaching", source);
                warn!(
                    conversation_id = %record.conversation_id(),
                    error = %err,
                    "Teaching generator failed, using fallback greeting"
                );
                fallback_greeting(record.topic_info())
            }
        }
    }
}
