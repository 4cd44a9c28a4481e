//! Append-only JSONL transcript log.
//!
//! Every executed turn appends one line holding the full conversation so far.
//! The line is serialized before the file lock is taken and written with a
//! single `write_all`, so concurrent conversations never interleave.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::record::{ConversationRecord, StudentProfile, TopicInfo, Turn, UnderstandingLevel};

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "conversations.jsonl";

/// Per-entry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Turn count at the time of the entry.
    pub turn_count: u32,
    /// Turn ceiling.
    pub max_turns: u32,
    /// Whether the conversation had ended.
    pub conversation_ended: bool,
}

/// One line of the transcript log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Conversation id.
    pub conversation_id: String,
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
    /// Level at the time of the entry.
    pub understanding_level: Option<UnderstandingLevel>,
    /// Confidence at the time of the entry.
    pub confidence: Option<f64>,
    /// Whether the assessment was locked.
    pub locked: bool,
    /// Student profile.
    pub student_profile: StudentProfile,
    /// Topic info.
    pub topic_info: TopicInfo,
    /// Full transcript at the time of the entry.
    pub messages: Vec<Turn>,
    /// Length of `messages`.
    pub message_count: usize,
    /// Turn bookkeeping.
    pub metadata: EntryMetadata,
}

impl TranscriptEntry {
    /// Snapshots a record.
    #[must_use]
    pub fn from_record(record: &ConversationRecord) -> Self {
        Self {
            timestamp: Utc::now(),
            conversation_id: record.conversation_id().to_string(),
            student_id: record.student_id().to_string(),
            topic_id: record.topic_id().to_string(),
            understanding_level: record.understanding_level(),
            confidence: record.confidence(),
            locked: record.is_locked(),
            student_profile: record.student_profile().clone(),
            topic_info: record.topic_info().clone(),
            messages: record.transcript().to_vec(),
            message_count: record.transcript().len(),
            metadata: EntryMetadata {
                turn_count: record.turn_count(),
                max_turns: record.max_turns(),
                conversation_ended: record.is_ended(),
            },
        }
    }
}

/// Shared writer for the transcript log.
#[derive(Debug)]
pub struct TranscriptLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl TranscriptLog {
    /// Opens (creating if needed) `conversations.jsonl` inside `log_dir`.
    pub async fn open(log_dir: impl AsRef<Path>) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        tokio::fs::create_dir_all(log_dir).await?;
        let path = log_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry for `record`.
    pub async fn append(&self, record: &ConversationRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&TranscriptEntry::from_record(record))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads entries back, newest first.
    ///
    /// Malformed lines are skipped. A missing file yields no entries.
    pub async fn load_entries(
        path: impl AsRef<Path>,
        student_id: Option<&str>,
        topic_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<TranscriptEntry>> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<TranscriptEntry> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "Skipping malformed transcript log line");
                    None
                }
            })
            .filter(|entry: &TranscriptEntry| {
                student_id.map_or(true, |s| entry.student_id == s)
                    && topic_id.map_or(true, |t| entry.topic_id == t)
            })
            .collect();

        // Later lines win timestamp ties
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
