//! Batch fan-out over student/topic pairs.
//!
//! Each pair runs one complete conversation; up to `concurrency`
//! conversations advance at once. Failures are reported per pair and never
//! abort the batch.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::executor::TurnExecutor;
use crate::interlocutor::{Catalog, Prediction, SetType};
use crate::record::{ConversationRecord, UnderstandingLevel};

/// One student/topic combination to tutor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BatchPair {
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
}

impl BatchPair {
    /// Creates a pair.
    #[must_use]
    pub fn new(student_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            topic_id: topic_id.into(),
        }
    }
}

/// What happened to one pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Student id.
    pub student_id: String,
    /// Topic id.
    pub topic_id: String,
    /// Conversation id, if one was started.
    pub conversation_id: Option<String>,
    /// Final level, or 3 when the conversation was never assessed.
    pub predicted_level: u8,
    /// Turns completed.
    pub turns: u32,
    /// Whether the assessment locked.
    pub locked: bool,
    /// Error message if the conversation failed.
    pub error: Option<String>,
}

impl BatchOutcome {
    fn completed(pair: &BatchPair, record: &ConversationRecord) -> Self {
        Self {
            student_id: pair.student_id.clone(),
            topic_id: pair.topic_id.clone(),
            conversation_id: Some(record.conversation_id().to_string()),
            predicted_level: record.understanding_level().unwrap_or_default().get(),
            turns: record.turn_count(),
            locked: record.is_locked(),
            error: None,
        }
    }

    fn failed(pair: &BatchPair, conversation_id: Option<String>, error: String) -> Self {
        Self {
            student_id: pair.student_id.clone(),
            topic_id: pair.topic_id.clone(),
            conversation_id,
            predicted_level: UnderstandingLevel::DEFAULT.get(),
            turns: 0,
            locked: false,
            error: Some(error),
        }
    }

    /// Returns `true` if the conversation ran to completion.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The prediction to submit for this pair.
    #[must_use]
    pub fn prediction(&self) -> Prediction {
        Prediction {
            student_id: self.student_id.clone(),
            topic_id: self.topic_id.clone(),
            predicted_level: self.predicted_level,
        }
    }
}

/// Lists every student/topic pair of a set, up to `limit` pairs.
pub async fn collect_pairs(
    catalog: &dyn Catalog,
    set_type: SetType,
    limit: Option<usize>,
) -> Result<Vec<BatchPair>> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut pairs = Vec::new();

    for student in catalog.list_students(Some(set_type)).await? {
        if pairs.len() >= limit {
            break;
        }
        for topic in catalog.list_student_topics(&student.id).await? {
            if pairs.len() >= limit {
                break;
            }
            pairs.push(BatchPair::new(&student.id, topic.id));
        }
    }

    Ok(pairs)
}

async fn run_pair(executor: &TurnExecutor, catalog: &dyn Catalog, pair: BatchPair) -> BatchOutcome {
    let profile = match catalog.student_profile(&pair.student_id).await {
        Ok(profile) => profile,
        Err(e) => return BatchOutcome::failed(&pair, None, e.to_string()),
    };
    let topic = match catalog.topic_info(&pair.topic_id).await {
        Ok(topic) => topic,
        Err(e) => return BatchOutcome::failed(&pair, None, e.to_string()),
    };

    let session = match executor
        .start_conversation(&pair.student_id, &pair.topic_id, profile, topic)
        .await
    {
        Ok(session) => session,
        Err(e) => return BatchOutcome::failed(&pair, None, e.to_string()),
    };
    let conversation_id = session.record.conversation_id().to_string();

    let outcome = match executor.run_to_completion(&conversation_id).await {
        Ok(record) => BatchOutcome::completed(&pair, &record),
        Err(e) => {
            warn!(
                conversation_id = %conversation_id,
                student_id = %pair.student_id,
                topic_id = %pair.topic_id,
                error = %e,
                "Batch conversation failed"
            );
            BatchOutcome::failed(&pair, Some(conversation_id.clone()), e.to_string())
        }
    };

    // Batch records do not outlive their outcome
    executor.store().evict(&conversation_id);
    outcome
}

/// Runs one conversation per pair with bounded concurrency.
///
/// Outcomes arrive in completion order, one per pair.
pub async fn run_batch(
    executor: &TurnExecutor,
    catalog: &dyn Catalog,
    pairs: Vec<BatchPair>,
    concurrency: usize,
) -> Vec<BatchOutcome> {
    let total = pairs.len();
    info!(pairs = total, concurrency, "Starting batch");

    let outcomes: Vec<BatchOutcome> = stream::iter(pairs)
        .map(|pair| run_pair(executor, catalog, pair))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    info!(pairs = total, failed, "Batch finished");
    outcomes
}
