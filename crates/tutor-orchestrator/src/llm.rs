//! OpenAI-compatible chat-completions adapters for the capability traits.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::assessment::{AssessmentOracle, AssessmentRequest, RawAssessment};
use crate::config::LlmConfig;
use crate::error::{CapabilityError, CapabilityErrorKind, Result, TutorError};
use crate::prompts;
use crate::teaching::{TeachingGenerator, TeachingRequest};

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Minimal chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    /// Creates a client for `endpoint`.
    ///
    /// Deadlines are applied by the callers, so the client itself has none.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Creates a client from configuration, reading the key from the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the key variable is unset or empty.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
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
        Ok(Self::new(config.base_url.clone(), api_key, config.model.clone()))
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        json_reply: bool,
    ) -> std::result::Result<String, CapabilityError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            response_format: json_reply.then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::new(CapabilityErrorKind::Timeout, format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    CapabilityError::transport(format!("Connection failed: {e}"))
                } else {
                    CapabilityError::transport(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::transport(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map_or(body, |envelope| envelope.error.message);
            let detail = match status.as_u16() {
                401 => format!("Authentication failed: {message}"),
                429 => format!("Rate limit exceeded: {message}"),
                400 => format!("Invalid request: {message}"),
                500..=599 => format!("Server error: {message}"),
                _ => format!("HTTP {status}: {message}"),
            };
            return Err(CapabilityError::new(CapabilityErrorKind::Status, detail));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            CapabilityError::malformed(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CapabilityError::malformed("response has no message content"))
    }
}

/// Assessment oracle backed by a chat model.
#[derive(Debug, Clone)]
pub struct LlmOracle {
    chat: Arc<OpenAiChat>,
    temperature: f32,
}

impl LlmOracle {
    /// Creates an oracle sampling at `temperature`.
    #[must_use]
    pub const fn new(chat: Arc<OpenAiChat>, temperature: f32) -> Self {
        Self { chat, temperature }
    }
}

/// Parses a model reply into a raw assessment.
pub fn parse_assessment(text: &str) -> std::result::Result<RawAssessment, CapabilityError> {
    let json = prompts::extract_json(text)
        .ok_or_else(|| CapabilityError::malformed("reply contains no JSON object"))?;
    serde_json::from_str(json)
        .map_err(|e| CapabilityError::malformed(format!("reply is not an assessment object: {e}")))
}

#[async_trait]
impl AssessmentOracle for LlmOracle {
    async fn infer(
        &self,
        request: &AssessmentRequest,
    ) -> std::result::Result<RawAssessment, CapabilityError> {
        let user = prompts::assessment_user_prompt(request);
        let reply = self
            .chat
            .complete(prompts::assessment_system_prompt(), &user, self.temperature, true)
            .await?;
        parse_assessment(&reply)
    }
}

/// Teaching generator backed by a chat model.
#[derive(Debug, Clone)]
pub struct LlmGenerator {
    chat: Arc<OpenAiChat>,
    temperature: f32,
}

impl LlmGenerator {
    /// Creates a generator sampling at `temperature`.
    #[must_use]
    pub const fn new(chat: Arc<OpenAiChat>, temperature: f32) -> Self {
        Self { chat, temperature }
    }
}

#[async_trait]
impl TeachingGenerator for LlmGenerator {
    async fn generate(
        &self,
        request: &TeachingRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let system = prompts::teaching_system_prompt(request.style);
        let user = prompts::teaching_user_prompt(request);
        let reply = self
            .chat
            .complete(&system, &user, self.temperature, false)
            .await?;
        Ok(reply.trim().to_string())
    }
}
