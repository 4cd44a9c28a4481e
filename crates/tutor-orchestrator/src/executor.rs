//! Turn executor: the conversation state machine.
//!
//! One call to [`TurnExecutor::run_turn`] moves a conversation through
//! [`TurnPhase::AwaitingAssessment`] (optional), [`TurnPhase::AwaitingTeaching`]
//! and [`TurnPhase::AwaitingExchange`], then runs the post-exchange assessment
//! and persists the record. The turn works on a copy of the record while the
//! conversation's turn lock is held; nothing is written back unless the whole
//! turn succeeds.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assessment::{AssessmentOracle, AssessmentSource, Assessor};
use crate::config::Config;
use crate::error::{Result, TransportErrorKind, TutorError};
use crate::interlocutor::Interlocutor;
use crate::policy::{self, AssessmentPolicy};
use crate::record::{ConversationRecord, StudentProfile, TopicInfo, UnderstandingLevel};
use crate::store::ConversationStore;
use crate::teaching::{Teacher, TeachingGenerator};
use crate::transcript_log::TranscriptLog;
use crate::websocket::{EventBroadcaster, TutorEvent};

// ============================================================================
// TurnPhase
// ============================================================================

/// Where a conversation stands within the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// Student turns exist that no assessment has seen yet.
    AwaitingAssessment,
    /// The next tutor message must be produced.
    AwaitingTeaching,
    /// A tutor message is ready to send.
    AwaitingExchange,
    /// No further turns.
    Terminal,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingAssessment => write!(f, "awaiting_assessment"),
            Self::AwaitingTeaching => write!(f, "awaiting_teaching"),
            Self::AwaitingExchange => write!(f, "awaiting_exchange"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

impl TurnPhase {
    /// Phase a stored record will start its next turn in.
    #[must_use]
    pub fn of(record: &ConversationRecord) -> Self {
        if policy::is_terminal(record) {
            Self::Terminal
        } else if needs_catch_up(record) {
            Self::AwaitingAssessment
        } else {
            Self::AwaitingTeaching
        }
    }
}

fn needs_catch_up(record: &ConversationRecord) -> bool {
    policy::should_assess(record) && record.student_turn_count() > record.assessed_student_turns()
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of one executed turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Conversation id.
    pub conversation_id: String,
    /// Message sent to the student.
    pub tutor_message: String,
    /// What the student replied.
    pub student_reply: String,
    /// Turn count after this turn.
    pub turn_count: u32,
    /// Level after this turn.
    pub understanding_level: Option<UnderstandingLevel>,
    /// Confidence after this turn.
    pub confidence: Option<f64>,
    /// Whether the assessment is locked.
    pub locked: bool,
    /// Whether the conversation ended.
    pub ended: bool,
    /// Phase of the next turn.
    pub next_phase: TurnPhase,
}

impl TurnOutcome {
    fn new(record: &ConversationRecord, tutor_message: String, student_reply: String) -> Self {
        Self {
            conversation_id: record.conversation_id().to_string(),
            tutor_message,
            student_reply,
            turn_count: record.turn_count(),
            understanding_level: record.understanding_level(),
            confidence: record.confidence(),
            locked: record.is_locked(),
            ended: record.is_ended(),
            next_phase: TurnPhase::of(record),
        }
    }
}

/// A freshly registered conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSession {
    /// The new record.
    pub record: ConversationRecord,
    /// Conversations left in the interlocutor quota, if reported.
    pub remaining_quota: Option<u32>,
}

// ============================================================================
// TurnExecutor
// ============================================================================

/// Drives conversations turn by turn.
pub struct TurnExecutor {
    store: ConversationStore,
    assessor: Assessor,
    teacher: Teacher,
    interlocutor: Arc<dyn Interlocutor>,
    exchange_timeout: Duration,
    transcript_log: Option<Arc<TranscriptLog>>,
    events: EventBroadcaster,
}

impl TurnExecutor {
    /// Creates an executor without a transcript log.
    pub fn new(
        store: ConversationStore,
        assessor: Assessor,
        teacher: Teacher,
        interlocutor: Arc<dyn Interlocutor>,
        exchange_timeout: Duration,
    ) -> Self {
        Self {
            store,
            assessor,
            teacher,
            interlocutor,
            exchange_timeout,
            transcript_log: None,
            events: EventBroadcaster::default(),
        }
    }

    /// Creates an executor whose thresholds and deadlines come from `config`.
    pub fn from_config(
        config: &Config,
        store: ConversationStore,
        oracle: Arc<dyn AssessmentOracle>,
        generator: Arc<dyn TeachingGenerator>,
        interlocutor: Arc<dyn Interlocutor>,
    ) -> Self {
        let assessor = Assessor::new(
            oracle,
            AssessmentPolicy::from(&config.assessment),
            config.timeouts.oracle(),
        );
        let teacher = Teacher::new(generator, config.timeouts.generator());
        Self::new(
            store,
            assessor,
            teacher,
            interlocutor,
            config.timeouts.exchange(),
        )
    }

    /// Appends an entry to `log` after every turn.
    #[must_use]
    pub fn with_transcript_log(mut self, log: Arc<TranscriptLog>) -> Self {
        self.transcript_log = Some(log);
        self
    }

    /// Publishes events through `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    /// The conversation store.
    #[must_use]
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The event broadcaster.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Opens a conversation with the interlocutor and registers its record.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the interlocutor cannot start the conversation,
    /// `AlreadyExists` if it hands out an id that is already live.
    pub async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
        student_profile: StudentProfile,
        topic_info: TopicInfo,
    ) -> Result<StartedSession> {
        let started = match tokio::time::timeout(
            self.exchange_timeout,
            self.interlocutor.start_conversation(student_id, topic_id),
        )
        .await
        {
            Ok(started) => started?,
            Err(_) => {
                return Err(TutorError::transport(
                    TransportErrorKind::Timeout,
                    format!(
                        "conversation start did not finish within {}s",
                        self.exchange_timeout.as_secs()
                    ),
                ))
            }
        };

        let record = self.store.create(
            &started.conversation_id,
            student_id,
            topic_id,
            started.max_turns,
            student_profile,
            topic_info,
        )?;

        info!(
            conversation_id = %record.conversation_id(),
            student_id,
            topic_id,
            max_turns = record.max_turns(),
            "Conversation started"
        );
        self.events.send(TutorEvent::conversation_started(&record));

        Ok(StartedSession {
            record,
            remaining_quota: started.remaining_quota,
        })
    }

    /// Runs one turn.
    ///
    /// With `explicit_message` the tutor message is sent verbatim and the
    /// pre-exchange assessment is skipped.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown ids, or if the conversation is evicted while
    ///   the turn runs (the result is discarded)
    /// - `ConversationEnded` / `TurnLimitReached` for terminal records
    /// - `TransportFailure` if the exchange fails; the stored record is unchanged
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        explicit_message: Option<String>,
    ) -> Result<TurnOutcome> {
        let _turn = self.store.begin_turn(conversation_id).await?;
        let mut record = self.store.get(conversation_id)?;
        policy::ensure_turn_allowed(&record)?;

        let mut newly_locked = false;

        if explicit_message.is_none() && needs_catch_up(&record) {
            debug!(conversation_id, phase = %TurnPhase::AwaitingAssessment, "Entering phase");
            newly_locked |= self.assess_into(&mut record).await?;
        }

        debug!(conversation_id, phase = %TurnPhase::AwaitingTeaching, "Entering phase");
        let tutor_message = match explicit_message {
            Some(message) => message,
            None => self.teacher.compose(&record).await,
        };

        debug!(conversation_id, phase = %TurnPhase::AwaitingExchange, "Entering phase");
        let reply = match self.exchange(conversation_id, &tutor_message).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(conversation_id, error = %err, "Exchange failed, turn not committed");
                self.events
                    .send(TutorEvent::error(Some(conversation_id), err.to_string()));
                return Err(err);
            }
        };

        let clamped =
            record.record_exchange(&tutor_message, &reply.student_reply, reply.turn_number)?;

        if policy::should_assess(&record) {
            newly_locked |= self.assess_into(&mut record).await?;
        }

        if reply.is_complete || clamped {
            record.mark_ended();
        }

        if let Err(err) = self.store.update(record.clone()) {
            info!(conversation_id, "Conversation evicted during turn, result discarded");
            return Err(err);
        }
        self.publish(&record, newly_locked).await;

        info!(
            conversation_id,
            turn = record.turn_count(),
            level = record.understanding_level().map(UnderstandingLevel::get),
            confidence = record.confidence(),
            locked = record.is_locked(),
            ended = record.is_ended(),
            "Turn completed"
        );

        Ok(TurnOutcome::new(&record, tutor_message, reply.student_reply))
    }

    /// Runs turns until the conversation is terminal and returns the final record.
    ///
    /// At most one exchange runs per turn left at the start. If the
    /// interlocutor has not reached the ceiling or completed by then, the
    /// conversation is ended locally.
    pub async fn run_to_completion(&self, conversation_id: &str) -> Result<ConversationRecord> {
        let initial = self.store.get(conversation_id)?;
        let budget = initial.max_turns().saturating_sub(initial.turn_count());

        let mut exchanges = 0u32;
        loop {
            let record = self.store.get(conversation_id)?;
            if policy::is_terminal(&record) {
                return Ok(record);
            }
            if exchanges >= budget {
                return self.end_stalled(conversation_id, exchanges).await;
            }
            self.run_turn(conversation_id, None).await?;
            exchanges += 1;
        }
    }

    async fn end_stalled(&self, conversation_id: &str, exchanges: u32) -> Result<ConversationRecord> {
        let _turn = self.store.begin_turn(conversation_id).await?;
        let mut record = self.store.get(conversation_id)?;
        if policy::is_terminal(&record) {
            return Ok(record);
        }

        warn!(
            conversation_id,
            exchanges,
            turn = record.turn_count(),
            max_turns = record.max_turns(),
            "Interlocutor stopped advancing turns, ending conversation"
        );
        record.mark_ended();
        self.store.update(record.clone())?;
        self.events.send(TutorEvent::conversation_ended(&record));
        Ok(record)
    }

    async fn exchange(
        &self,
        conversation_id: &str,
        tutor_message: &str,
    ) -> Result<crate::interlocutor::ExchangeResponse> {
        match tokio::time::timeout(
            self.exchange_timeout,
            self.interlocutor.exchange(conversation_id, tutor_message),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(TutorError::transport(
                TransportErrorKind::Timeout,
                format!(
                    "no student reply within {}s",
                    self.exchange_timeout.as_secs()
                ),
            )),
        }
    }

    /// Assesses and applies the outcome. Returns `true` if this locked the record.
    async fn assess_into(&self, record: &mut ConversationRecord) -> Result<bool> {
        let outcome = self.assessor.assess(record).await;
        if outcome.source == AssessmentSource::Skipped {
            return Ok(false);
        }

        let student_turns = record.student_turn_count();
        let applied = record.apply_estimate(outcome.estimate, student_turns)?;
        debug!(
            conversation_id = %record.conversation_id(),
            level = record.understanding_level().map(UnderstandingLevel::get),
            confidence = record.confidence(),
            source = ?outcome.source,
            "Assessment applied"
        );

        if applied && outcome.should_lock {
            record.lock()?;
            info!(
                conversation_id = %record.conversation_id(),
                level = record.understanding_level().map(UnderstandingLevel::get),
                confidence = record.confidence(),
                "Baseline assessment locked"
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn publish(&self, record: &ConversationRecord, newly_locked: bool) {
        if let Some(log) = &self.transcript_log {
            if let Err(e) = log.append(record).await {
                warn!(
                    conversation_id = %record.conversation_id(),
                    error = %e,
                    "Failed to write transcript log entry"
                );
            }
        }

        self.events.send(TutorEvent::turn_completed(record));
        if newly_locked {
            if let Some(level) = record.understanding_level() {
                self.events.send(TutorEvent::assessment_locked(
                    record.conversation_id(),
                    level,
                    record.confidence(),
                ));
            }
        }
        if policy::is_terminal(record) {
            info!(
                conversation_id = %record.conversation_id(),
                turn = record.turn_count(),
                "Conversation ended"
            );
            self.events.send(TutorEvent::conversation_ended(record));
        }
    }
}
