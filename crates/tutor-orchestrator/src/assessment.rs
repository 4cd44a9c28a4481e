//! Baseline understanding assessment.
//!
//! The [`AssessmentOracle`] trait is the seam to whatever reasoning backend
//! produces a raw estimate. [`Assessor`] wraps an oracle with a deadline,
//! validates every field of the raw reply and substitutes fallback values when
//! the oracle fails, so assessment never fails a turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CapabilityError, TutorError};
use crate::policy::{AssessmentPolicy, BaselineWindow};
use crate::record::{
    ConversationRecord, StudentProfile, TopicInfo, UnderstandingEstimate, UnderstandingLevel,
};

/// Confidence used when the oracle reply has none and nothing was known before.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Confidence used when the oracle fails and nothing was known before.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Evidence used when the oracle fails and nothing was known before.
pub const FALLBACK_EVIDENCE: &str = "Unable to assess - using previous/default level";

// ============================================================================
// Oracle seam
// ============================================================================

/// Input handed to an oracle.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentRequest {
    /// Baseline window of the transcript.
    pub window: BaselineWindow,
    /// Who the student is.
    pub student_profile: StudentProfile,
    /// What is being taught.
    pub topic_info: TopicInfo,
    /// Estimate currently stored on the record.
    pub previous: UnderstandingEstimate,
}

/// Unvalidated oracle reply. Any field may be absent or of the wrong type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAssessment {
    /// Proposed level.
    #[serde(default, alias = "understanding_level")]
    pub level: Option<Value>,
    /// Proposed confidence.
    #[serde(default)]
    pub confidence: Option<Value>,
    /// Proposed justification.
    #[serde(default)]
    pub evidence: Option<Value>,
    /// Proposed lock decision.
    #[serde(default)]
    pub should_lock: Option<Value>,
}

/// Produces raw understanding estimates.
#[async_trait]
pub trait AssessmentOracle: Send + Sync {
    /// Infers an estimate from the baseline window.
    async fn infer(
        &self,
        request: &AssessmentRequest,
    ) -> std::result::Result<RawAssessment, CapabilityError>;
}

#[async_trait]
impl<T: AssessmentOracle + ?Sized> AssessmentOracle for Arc<T> {
    async fn infer(
        &self,
        request: &AssessmentRequest,
    ) -> std::result::Result<RawAssessment, CapabilityError> {
        (**self).infer(request).await
    }
}

// ============================================================================
// Assessor
// ============================================================================

/// Where an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentSource {
    /// Validated oracle reply.
    Oracle,
    /// Oracle failed; previous or default values substituted.
    Fallback,
    /// No student turn yet; oracle not consulted.
    Skipped,
}

/// Validated result of one assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentOutcome {
    /// Estimate to apply to the record.
    pub estimate: UnderstandingEstimate,
    /// Whether the record should be locked after applying.
    pub should_lock: bool,
    /// Provenance.
    pub source: AssessmentSource,
    /// Student turns inside the window the estimate was derived from.
    pub student_turns: usize,
}

/// Runs an oracle with deadline, validation and fallback.
pub struct Assessor {
    oracle: Arc<dyn AssessmentOracle>,
    policy: AssessmentPolicy,
    timeout: Duration,
}

impl Assessor {
    /// Creates an assessor around `oracle`.
    pub fn new(oracle: Arc<dyn AssessmentOracle>, policy: AssessmentPolicy, timeout: Duration) -> Self {
        Self {
            oracle,
            policy,
            timeout,
        }
    }

    /// The thresholds used by this assessor.
    #[must_use]
    pub const fn policy(&self) -> &AssessmentPolicy {
        &self.policy
    }

    /// Assesses the record's baseline window. Never fails.
    pub async fn assess(&self, record: &ConversationRecord) -> AssessmentOutcome {
        let previous = record.estimate();
        let window = self.policy.baseline_window(record.transcript());

        if record.student_turn_count() == 0 {
            debug!(
                conversation_id = %record.conversation_id(),
                "No student turns yet, skipping assessment"
            );
            return AssessmentOutcome {
                estimate: previous,
                should_lock: false,
                source: AssessmentSource::Skipped,
                student_turns: 0,
            };
        }

        let request = AssessmentRequest {
            window,
            student_profile: record.student_profile().clone(),
            topic_info: record.topic_info().clone(),
            previous,
        };

        let reply = match tokio::time::timeout(self.timeout, self.oracle.infer(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(CapabilityError::timeout(self.timeout)),
        };

        match reply {
            Ok(raw) => self.validate(raw, request),
            Err(source) => {
                let err = TutorError::capability("assessment", source);
                warn!(
                    conversation_id = %record.conversation_id(),
                    error = %err,
                    "Assessment oracle failed, using fallback estimate"
                );
                Self::fallback(request)
            }
        }
    }

    fn validate(&self, raw: RawAssessment, request: AssessmentRequest) -> AssessmentOutcome {
        let AssessmentRequest {
            window, previous, ..
        } = request;

        let level = raw
            .level
            .as_ref()
            .and_then(Value::as_i64)
            .and_then(UnderstandingLevel::from_i64)
            .or(previous.level)
            .unwrap_or_default();

        let confidence = raw
            .confidence
            .as_ref()
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
            .or(previous.confidence)
            .unwrap_or(DEFAULT_CONFIDENCE);

        let evidence = raw
            .evidence
            .as_ref()
            .and_then(Value::as_str)
            .filter(|e| !e.trim().is_empty())
            .map_or(previous.evidence, str::to_string);

        let should_lock = raw
            .should_lock
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or_else(|| self.policy.derive_should_lock(confidence, &window));

        AssessmentOutcome {
            estimate: UnderstandingEstimate {
                level: Some(level),
                confidence: Some(confidence),
                evidence,
            },
            should_lock,
            source: AssessmentSource::Oracle,
            student_turns: window.student_turns,
        }
    }

    fn fallback(request: AssessmentRequest) -> AssessmentOutcome {
        let AssessmentRequest {
            window, previous, ..
        } = request;

        let should_lock = previous.level.is_some() && window.student_turns >= 1;
        let evidence = if previous.evidence.is_empty() {
            FALLBACK_EVIDENCE.to_string()
        } else {
            previous.evidence
        };

        AssessmentOutcome {
            estimate: UnderstandingEstimate {
                level: Some(previous.level.unwrap_or_default()),
                confidence: Some(previous.confidence.unwrap_or(FALLBACK_CONFIDENCE)),
                evidence,
            },
            should_lock,
            source: AssessmentSource::Fallback,
            student_turns: window.student_turns,
        }
    }
}
