//! Deterministic stubs for tests.
//!
//! The stubs hand out queued responses in order and record every call, so
//! tests can script a conversation and then inspect what the orchestrator
//! asked for.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::assessment::{AssessmentOracle, AssessmentRequest, RawAssessment};
use crate::error::{CapabilityError, Result, TutorError};
use crate::interlocutor::{
    Catalog, ExchangeResponse, Interlocutor, SetType, StartedConversation, Student, Topic,
};
use crate::teaching::{TeachingGenerator, TeachingRequest};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// ScriptedOracle
// ============================================================================

/// Oracle that returns queued replies.
///
/// With an empty queue every call fails as malformed.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<std::result::Result<RawAssessment, CapabilityError>>>,
    requests: Mutex<Vec<AssessmentRequest>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    /// Creates an oracle with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a reply.
    pub fn queue_reply(&self, reply: RawAssessment) {
        guard(&self.replies).push_back(Ok(reply));
    }

    /// Queues a failure.
    pub fn queue_error(&self, error: CapabilityError) {
        guard(&self.replies).push_back(Err(error));
    }

    /// Requests received so far.
    pub fn recorded_requests(&self) -> Vec<AssessmentRequest> {
        guard(&self.requests).clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        guard(&self.requests).len()
    }
}

#[async_trait]
impl AssessmentOracle for ScriptedOracle {
    async fn infer(
        &self,
        request: &AssessmentRequest,
    ) -> std::result::Result<RawAssessment, CapabilityError> {
        guard(&self.requests).push(request.clone());
        pause(self.delay).await;
        guard(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(CapabilityError::malformed("no scripted assessment queued")))
    }
}

// ============================================================================
// ScriptedGenerator
// ============================================================================

/// Generator that returns queued messages.
///
/// With an empty queue it answers `"Scripted tutor message N"`.
#[derive(Default)]
pub struct ScriptedGenerator {
    messages: Mutex<VecDeque<std::result::Result<String, CapabilityError>>>,
    requests: Mutex<Vec<TeachingRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    /// Creates a generator with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a message.
    pub fn queue_message(&self, message: impl Into<String>) {
        guard(&self.messages).push_back(Ok(message.into()));
    }

    /// Queues a failure.
    pub fn queue_error(&self, error: CapabilityError) {
        guard(&self.messages).push_back(Err(error));
    }

    /// Requests received so far.
    pub fn recorded_requests(&self) -> Vec<TeachingRequest> {
        guard(&self.requests).clone()
    }
}

#[async_trait]
impl TeachingGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &TeachingRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let n = {
            let mut requests = guard(&self.requests);
            requests.push(request.clone());
            requests.len()
        };
        pause(self.delay).await;
        guard(&self.messages)
            .pop_front()
            .unwrap_or_else(|| Ok(format!("Scripted tutor message {n}")))
    }
}

// ============================================================================
// ScriptedInterlocutor
// ============================================================================

enum Scripted {
    Reply(String),
    Response(ExchangeResponse),
    Error(TutorError),
}

/// In-memory student service.
///
/// Turn numbers count up per conversation and the conversation completes at
/// `max_turns`, unless a full response is queued explicitly.
pub struct ScriptedInterlocutor {
    max_turns: u32,
    next_id: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
    turns: Mutex<HashMap<String, u32>>,
    exchanges: Mutex<Vec<(String, String)>>,
    students: Vec<Student>,
    topics: Vec<Topic>,
    delay: Option<Duration>,
}

impl ScriptedInterlocutor {
    /// Creates a service whose conversations allow `max_turns` turns.
    #[must_use]
    pub fn new(max_turns: u32) -> Self {
        Self {
            max_turns,
            next_id: AtomicUsize::new(1),
            script: Mutex::new(VecDeque::new()),
            turns: Mutex::new(HashMap::new()),
            exchanges: Mutex::new(Vec::new()),
            students: Vec::new(),
            topics: Vec::new(),
            delay: None,
        }
    }

    /// Sets the catalog contents. Every student is assigned every topic.
    #[must_use]
    pub fn with_catalog(mut self, students: Vec<Student>, topics: Vec<Topic>) -> Self {
        self.students = students;
        self.topics = topics;
        self
    }

    /// Delays every exchange by `delay`.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a student reply text; the turn number is assigned automatically.
    pub fn queue_reply(&self, text: impl Into<String>) {
        guard(&self.script).push_back(Scripted::Reply(text.into()));
    }

    /// Queues a complete response, used verbatim.
    pub fn queue_response(&self, response: ExchangeResponse) {
        guard(&self.script).push_back(Scripted::Response(response));
    }

    /// Queues a failure.
    pub fn queue_error(&self, error: TutorError) {
        guard(&self.script).push_back(Scripted::Error(error));
    }

    /// `(conversation_id, tutor_message)` pairs received so far.
    pub fn recorded_exchanges(&self) -> Vec<(String, String)> {
        guard(&self.exchanges).clone()
    }

    /// Number of conversations started.
    pub fn started_count(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl Interlocutor for ScriptedInterlocutor {
    async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<StartedConversation> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conversation_id = format!("conv-{n}");
        guard(&self.turns).insert(conversation_id.clone(), 0);

        Ok(StartedConversation {
            conversation_id,
            student_id: student_id.to_string(),
            topic_id: topic_id.to_string(),
            max_turns: self.max_turns,
            remaining_quota: None,
        })
    }

    async fn exchange(
        &self,
        conversation_id: &str,
        tutor_message: &str,
    ) -> Result<ExchangeResponse> {
        guard(&self.exchanges).push((conversation_id.to_string(), tutor_message.to_string()));
        pause(self.delay).await;

        let scripted = guard(&self.script).pop_front();
        let text = match scripted {
            Some(Scripted::Error(err)) => return Err(err),
            Some(Scripted::Response(response)) => {
                guard(&self.turns).insert(conversation_id.to_string(), response.turn_number);
                return Ok(response);
            }
            Some(Scripted::Reply(text)) => Some(text),
            None => None,
        };

        let turn_number = {
            let mut turns = guard(&self.turns);
            let turn = turns.entry(conversation_id.to_string()).or_insert(0);
            *turn += 1;
            *turn
        };

        Ok(ExchangeResponse {
            student_reply: text.unwrap_or_else(|| format!("Student reply {turn_number}")),
            turn_number,
            is_complete: turn_number >= self.max_turns,
            interaction_id: Some(format!("{conversation_id}-{turn_number}")),
        })
    }
}

#[async_trait]
impl Catalog for ScriptedInterlocutor {
    async fn list_students(&self, _set_type: Option<SetType>) -> Result<Vec<Student>> {
        Ok(self.students.clone())
    }

    async fn list_student_topics(&self, _student_id: &str) -> Result<Vec<Topic>> {
        Ok(self.topics.clone())
    }

    async fn list_topics(&self, subject_id: Option<&str>) -> Result<Vec<Topic>> {
        Ok(self
            .topics
            .iter()
            .filter(|t| subject_id.map_or(true, |s| t.subject_id == s))
            .cloned()
            .collect())
    }
}
