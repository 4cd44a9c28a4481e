//! Configuration types for the tutor loop orchestrator.
//!
//! This module provides all configuration structures used to control the
//! tutor loop: where the student interlocutor and the reasoning backend live,
//! how long each external call may take, and the thresholds of the baseline
//! assessment policy.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

fn default_interlocutor_base_url() -> String {
    "https://knowunity-agent-olympics-2026-api.vercel.app".to_string()
}

fn default_interlocutor_key_env() -> String {
    "KNOWUNITY_API_KEY".to_string()
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_assessment_temperature() -> f32 {
    0.3
}

const fn default_teaching_temperature() -> f32 {
    0.7
}

const fn default_capability_timeout() -> u64 {
    45
}

const fn default_exchange_timeout() -> u64 {
    60
}

const fn default_substantial_teaching_chars() -> usize {
    100
}

const fn default_max_student_turns() -> usize {
    3
}

const fn default_max_substantial_teaching() -> usize {
    2
}

const fn default_lock_confidence() -> f64 {
    0.7
}

fn default_log_dir() -> String {
    "logs".to_string()
}

const fn default_batch_concurrency() -> usize {
    4
}

/// Main configuration for the tutor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Student interlocutor service settings.
    #[serde(default)]
    pub interlocutor: InterlocutorConfig,

    /// Reasoning backend settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Deadlines for the three external calls of a turn.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Baseline assessment thresholds.
    #[serde(default)]
    pub assessment: AssessmentConfig,

    /// Directory holding the transcript log.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// How many conversations a batch run advances at once.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interlocutor: InterlocutorConfig::default(),
            llm: LlmConfig::default(),
            timeouts: TimeoutConfig::default(),
            assessment: AssessmentConfig::default(),
            log_dir: default_log_dir(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON, and `TutorError::ConfigValidationError` if the values fail
    /// [`Config::validate`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        require_non_empty(&self.interlocutor.base_url, "interlocutor.baseUrl")?;
        require_non_empty(&self.interlocutor.api_key_env, "interlocutor.apiKeyEnv")?;
        require_positive(
            self.interlocutor.request_timeout_secs,
            "interlocutor.requestTimeoutSecs",
        )?;

        require_non_empty(&self.llm.base_url, "llm.baseUrl")?;
        require_non_empty(&self.llm.api_key_env, "llm.apiKeyEnv")?;
        require_non_empty(&self.llm.model, "llm.model")?;
        for (value, key) in [
            (self.llm.assessment_temperature, "llm.assessmentTemperature"),
            (self.llm.teaching_temperature, "llm.teachingTemperature"),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(TutorError::config_validation(
                    format!("{key} must be between 0.0 and 2.0"),
                    format!("Set {key} to a sampling temperature in [0.0, 2.0] in your tutor.json"),
                ));
            }
        }

        require_positive(self.timeouts.oracle_secs, "timeouts.oracleSecs")?;
        require_positive(self.timeouts.generator_secs, "timeouts.generatorSecs")?;
        require_positive(self.timeouts.exchange_secs, "timeouts.exchangeSecs")?;

        let assessment = &self.assessment;
        require_positive(
            assessment.substantial_teaching_chars as u64,
            "assessment.substantialTeachingChars",
        )?;
        require_positive(assessment.max_student_turns as u64, "assessment.maxStudentTurns")?;
        require_positive(
            assessment.max_substantial_teaching as u64,
            "assessment.maxSubstantialTeaching",
        )?;
        if !(0.0..=1.0).contains(&assessment.lock_confidence) {
            return Err(TutorError::config_validation(
                "assessment.lockConfidence must be between 0.0 and 1.0",
                "Set assessment.lockConfidence to a confidence in [0.0, 1.0] in your tutor.json",
            ));
        }

        require_non_empty(&self.log_dir, "logDir")?;
        require_positive(self.batch_concurrency as u64, "batchConcurrency")?;

        Ok(())
    }
}

fn require_non_empty(value: &str, key: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TutorError::config_validation(
            format!("{key} must not be empty"),
            format!("Provide a value for {key} in your tutor.json"),
        ));
    }
    Ok(())
}

fn require_positive(value: u64, key: &str) -> Result<()> {
    if value == 0 {
        return Err(TutorError::config_validation(
            format!("{key} must be greater than 0"),
            format!("Set {key} to at least 1 in your tutor.json"),
        ));
    }
    Ok(())
}

/// Student interlocutor service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterlocutorConfig {
    /// Base URL of the student simulation service.
    #[serde(default = "default_interlocutor_base_url")]
    pub base_url: String,

    /// Environment variable holding the service API key.
    #[serde(default = "default_interlocutor_key_env")]
    pub api_key_env: String,

    /// Per-request HTTP timeout for catalog and evaluation calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for InterlocutorConfig {
    fn default() -> Self {
        Self {
            base_url: default_interlocutor_base_url(),
            api_key_env: default_interlocutor_key_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Reasoning backend settings for assessment and teaching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Chat-completions endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the backend API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Model name sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for baseline assessment.
    #[serde(default = "default_assessment_temperature")]
    pub assessment_temperature: f32,

    /// Sampling temperature for teaching messages.
    #[serde(default = "default_teaching_temperature")]
    pub teaching_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_key_env(),
            model: default_model(),
            assessment_temperature: default_assessment_temperature(),
            teaching_temperature: default_teaching_temperature(),
        }
    }
}

/// Deadlines applied to the suspension points of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Assessment oracle deadline in seconds.
    #[serde(default = "default_capability_timeout")]
    pub oracle_secs: u64,

    /// Teaching generator deadline in seconds.
    #[serde(default = "default_capability_timeout")]
    pub generator_secs: u64,

    /// Student exchange deadline in seconds.
    #[serde(default = "default_exchange_timeout")]
    pub exchange_secs: u64,
}

impl TimeoutConfig {
    /// Oracle deadline as a `Duration`.
    #[must_use]
    pub const fn oracle(&self) -> Duration {
        Duration::from_secs(self.oracle_secs)
    }

    /// Generator deadline as a `Duration`.
    #[must_use]
    pub const fn generator(&self) -> Duration {
        Duration::from_secs(self.generator_secs)
    }

    /// Exchange deadline as a `Duration`.
    #[must_use]
    pub const fn exchange(&self) -> Duration {
        Duration::from_secs(self.exchange_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            oracle_secs: default_capability_timeout(),
            generator_secs: default_capability_timeout(),
            exchange_secs: default_exchange_timeout(),
        }
    }
}

/// Thresholds of the baseline assessment window and lock decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentConfig {
    /// A tutor message longer than this many characters counts as substantial teaching.
    #[serde(default = "default_substantial_teaching_chars")]
    pub substantial_teaching_chars: usize,

    /// The baseline window closes at this student turn.
    #[serde(default = "default_max_student_turns")]
    pub max_student_turns: usize,

    /// The baseline window closes at this substantial tutor turn.
    #[serde(default = "default_max_substantial_teaching")]
    pub max_substantial_teaching: usize,

    /// Minimum confidence for a derived lock.
    #[serde(default = "default_lock_confidence")]
    pub lock_confidence: f64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            substantial_teaching_chars: default_substantial_teaching_chars(),
            max_student_turns: default_max_student_turns(),
            max_substantial_teaching: default_max_substantial_teaching(),
            lock_confidence: default_lock_confidence(),
        }
    }
}
