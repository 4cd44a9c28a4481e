//! Student interlocutor and catalog service.
//!
//! The [`Interlocutor`] trait covers the conversational half of the remote
//! student simulation service, [`Catalog`] the read-only student/topic
//! listings. [`HttpInterlocutor`] implements both against the HTTP service
//! and also exposes the evaluation endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::InterlocutorConfig;
use crate::error::{Result, TransportErrorKind, TutorError};
use crate::record::{StudentProfile, TopicInfo};

/// Header carrying the service API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Evaluation endpoints score every conversation and take longer.
const EVALUATION_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Wire types
// ============================================================================

/// Student partition used by the catalog and evaluation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    /// Small development set.
    MiniDev,
    /// Full development set.
    Dev,
    /// Held-out evaluation set.
    Eval,
}

impl SetType {
    /// Wire name of the set.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MiniDev => "mini_dev",
            Self::Dev => "dev",
            Self::Eval => "eval",
        }
    }
}

impl std::fmt::Display for SetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SetType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mini_dev" | "mini-dev" => Ok(Self::MiniDev),
            "dev" => Ok(Self::Dev),
            "eval" => Ok(Self::Eval),
            other => Err(format!(
                "unknown set type '{other}' (expected mini_dev, dev or eval)"
            )),
        }
    }
}

/// A student in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Student id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// School grade.
    pub grade_level: u32,
}

impl From<&Student> for StudentProfile {
    fn from(student: &Student) -> Self {
        Self {
            name: student.name.clone(),
            grade_level: student.grade_level,
        }
    }
}

/// A topic in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic id.
    pub id: String,
    /// Owning subject id.
    pub subject_id: String,
    /// Owning subject name, when the listing includes it.
    #[serde(default)]
    pub subject_name: Option<String>,
    /// Topic name.
    pub name: String,
    /// Grade the topic is taught at.
    pub grade_level: u32,
}

impl From<&Topic> for TopicInfo {
    fn from(topic: &Topic) -> Self {
        Self {
            name: topic.name.clone(),
            subject_id: topic.subject_id.clone(),
            subject_name: topic.subject_name.clone().unwrap_or_default(),
            grade_level: topic.grade_level,
        }
    }
}

/// Reply to a conversation start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedConversation {
    /// Id assigned by the service.
    pub conversation_id: String,
    /// Echoed student id.
    #[serde(default)]
    pub student_id: String,
    /// Echoed topic id.
    #[serde(default)]
    pub topic_id: String,
    /// Turn ceiling for this conversation.
    pub max_turns: u32,
    /// Conversations left in the caller's quota.
    #[serde(default, rename = "conversations_remaining")]
    pub remaining_quota: Option<u32>,
}

/// Reply to one tutor message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    /// What the student said.
    #[serde(rename = "student_response")]
    pub student_reply: String,
    /// Authoritative turn number after this exchange.
    pub turn_number: u32,
    /// Whether the service closed the conversation.
    pub is_complete: bool,
    /// Service-side id of this exchange.
    #[serde(default)]
    pub interaction_id: Option<String>,
}

/// One predicted level submitted for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
    /// Predicted understanding level (1-5).
    pub predicted_level: u8,
}

/// Score for a prediction submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MseResult {
    /// Mean squared error of the predictions.
    pub mse_score: f64,
    /// Number of predictions scored.
    pub num_predictions: u32,
    /// Sequence number of this submission.
    pub submission_number: u32,
    /// Submissions left, if the service limits them.
    #[serde(default)]
    pub submissions_remaining: Option<u32>,
}

/// Score for the tutoring quality of all conversations in a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutoringEvaluation {
    /// Tutoring quality score.
    pub score: f64,
    /// Number of conversations scored.
    pub num_conversations: u32,
    /// Sequence number of this submission.
    pub submission_number: u32,
    /// Submissions left, if the service limits them.
    #[serde(default)]
    pub submissions_remaining: Option<u32>,
}

// ============================================================================
// Traits
// ============================================================================

/// The conversational half of the student service.
#[async_trait]
pub trait Interlocutor: Send + Sync {
    /// Opens a conversation for a student/topic pair.
    async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<StartedConversation>;

    /// Sends one tutor message and returns the student's reply.
    async fn exchange(&self, conversation_id: &str, tutor_message: &str)
        -> Result<ExchangeResponse>;
}

/// Read-only student and topic listings.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Lists students, optionally restricted to one set.
    async fn list_students(&self, set_type: Option<SetType>) -> Result<Vec<Student>>;

    /// Lists the topics assigned to a student.
    async fn list_student_topics(&self, student_id: &str) -> Result<Vec<Topic>>;

    /// Lists topics, optionally restricted to one subject.
    async fn list_topics(&self, subject_id: Option<&str>) -> Result<Vec<Topic>>;

    /// Resolves a student's profile.
    ///
    /// Unknown ids resolve to an empty profile.
    async fn student_profile(&self, student_id: &str) -> Result<StudentProfile> {
        let students = self.list_students(None).await?;
        Ok(students
            .iter()
            .find(|s| s.id == student_id)
            .map(StudentProfile::from)
            .unwrap_or_else(|| {
                debug!(student_id, "Student not in catalog, using empty profile");
                StudentProfile::default()
            }))
    }

    /// Resolves a topic's descriptive info.
    ///
    /// Unknown ids resolve to empty topic info.
    async fn topic_info(&self, topic_id: &str) -> Result<TopicInfo> {
        let topics = self.list_topics(None).await?;
        Ok(topics
            .iter()
            .find(|t| t.id == topic_id)
            .map(TopicInfo::from)
            .unwrap_or_else(|| {
                debug!(topic_id, "Topic not in catalog, using empty topic info");
                TopicInfo::default()
            }))
    }
}

// ============================================================================
// HTTP adapter
// ============================================================================

/// HTTP client for the student simulation service.
#[derive(Debug, Clone)]
pub struct HttpInterlocutor {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpInterlocutor {
    /// Creates a client for `base_url` with a per-request timeout.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TutorError::transport(TransportErrorKind::Network, e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Creates a client from configuration, reading the key from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the key variable is unset or empty.
    pub fn from_config(config: &InterlocutorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                TutorError::config_validation(
                    format!("{} is not set", config.api_key_env),
                    format!(
                        "Export {} or add it to your .env file",
                        config.api_key_env
                    ),
                )
            })?;

        Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TutorError::transport(
                TransportErrorKind::Status(status.as_u16()),
                format!("HTTP {status}: {body}"),
            ));
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        serde_json::from_str(&body).map_err(|e| {
            TutorError::transport(
                TransportErrorKind::Decode,
                format!("failed to parse response: {e} - body: {body}"),
            )
        })
    }

    /// Submits predicted levels for scoring.
    pub async fn submit_predictions(
        &self,
        set_type: SetType,
        predictions: &[Prediction],
    ) -> Result<MseResult> {
        #[derive(Serialize)]
        struct Body<'a> {
            set_type: SetType,
            predictions: &'a [Prediction],
        }

        Self::send(
            self.post("/evaluate/mse")
                .timeout(EVALUATION_TIMEOUT)
                .json(&Body {
                    set_type,
                    predictions,
                }),
        )
        .await
    }

    /// Requests a tutoring-quality score for every conversation in a set.
    pub async fn evaluate_tutoring(&self, set_type: SetType) -> Result<TutoringEvaluation> {
        Self::send(
            self.post("/evaluate/tutoring")
                .timeout(EVALUATION_TIMEOUT)
                .json(&serde_json::json!({ "set_type": set_type })),
        )
        .await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TutorError {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_decode() {
        TransportErrorKind::Decode
    } else {
        TransportErrorKind::Network
    };
    TutorError::transport(kind, e.to_string())
}

#[async_trait]
impl Interlocutor for HttpInterlocutor {
    async fn start_conversation(
        &self,
        student_id: &str,
        topic_id: &str,
    ) -> Result<StartedConversation> {
        Self::send(self.post("/interact/start").json(&serde_json::json!({
            "student_id": student_id,
            "topic_id": topic_id,
        })))
        .await
    }

    async fn exchange(
        &self,
        conversation_id: &str,
        tutor_message: &str,
    ) -> Result<ExchangeResponse> {
        Self::send(self.post("/interact").json(&serde_json::json!({
            "conversation_id": conversation_id,
            "tutor_message": tutor_message,
        })))
        .await
    }
}

#[async_trait]
impl Catalog for HttpInterlocutor {
    async fn list_students(&self, set_type: Option<SetType>) -> Result<Vec<Student>> {
        let mut request = self.get("/students");
        if let Some(set_type) = set_type {
            request = request.query(&[("set_type", set_type.as_str())]);
        }
        Self::send(request).await
    }

    async fn list_student_topics(&self, student_id: &str) -> Result<Vec<Topic>> {
        Self::send(self.get(&format!("/students/{student_id}/topics"))).await
    }

    async fn list_topics(&self, subject_id: Option<&str>) -> Result<Vec<Topic>> {
        let mut request = self.get("/topics");
        if let Some(subject_id) = subject_id {
            request = request.query(&[("subject_id", subject_id)]);
        }
        Self::send(request).await
    }
}
