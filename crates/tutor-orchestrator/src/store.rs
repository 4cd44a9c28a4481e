//! In-memory registry of live conversations.
//!
//! Records are keyed by conversation id in a [`DashMap`], so lookups for
//! unrelated ids never contend. Each entry also owns an async turn lock that
//! serializes turns of one conversation; no map guard is held across an
//! `.await`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, TutorError};
use crate::record::{ConversationRecord, StudentProfile, TopicInfo};

/// Guard that holds a conversation's turn lock until dropped.
pub type TurnGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
struct StoreEntry {
    record: ConversationRecord,
    turn_lock: Arc<Mutex<()>>,
}

impl StoreEntry {
    fn new(record: ConversationRecord) -> Self {
        Self {
            record,
            turn_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Shared, cloneable conversation registry.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    entries: Arc<DashMap<String, StoreEntry>>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh record.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if `conversation_id` is taken.
    pub fn create(
        &self,
        conversation_id: &str,
        student_id: &str,
        topic_id: &str,
        max_turns: u32,
        student_profile: StudentProfile,
        topic_info: TopicInfo,
    ) -> Result<ConversationRecord> {
        match self.entries.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(TutorError::already_exists(conversation_id)),
            Entry::Vacant(slot) => {
                let record = ConversationRecord::new(
                    conversation_id,
                    student_id,
                    topic_id,
                    max_turns,
                    student_profile,
                    topic_info,
                );
                slot.insert(StoreEntry::new(record.clone()));
                Ok(record)
            }
        }
    }

    /// Returns a copy of the stored record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub fn get(&self, conversation_id: &str) -> Result<ConversationRecord> {
        self.entries
            .get(conversation_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| TutorError::not_found(conversation_id))
    }

    /// Replaces the stored record, inserting it if absent. Last write wins.
    pub fn put(&self, record: ConversationRecord) {
        match self.entries.entry(record.conversation_id().to_string()) {
            Entry::Occupied(mut slot) => slot.get_mut().record = record,
            Entry::Vacant(slot) => {
                slot.insert(StoreEntry::new(record));
            }
        }
    }

    /// Replaces the stored record only while its id is still registered.
    ///
    /// Unlike [`put`](Self::put) this never brings back an evicted record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is not (or no longer) in the store.
    pub fn update(&self, record: ConversationRecord) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(record.conversation_id()) {
            entry.record = record;
            return Ok(());
        }
        Err(TutorError::not_found(record.conversation_id()))
    }

    /// Waits for and acquires the turn lock of a conversation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn begin_turn(&self, conversation_id: &str) -> Result<TurnGuard> {
        let lock = self
            .entries
            .get(conversation_id)
            .map(|entry| Arc::clone(&entry.turn_lock))
            .ok_or_else(|| TutorError::not_found(conversation_id))?;
        Ok(lock.lock_owned().await)
    }

    /// Removes a record, returning it if it was present.
    pub fn evict(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.entries
            .remove(conversation_id)
            .map(|(_, entry)| entry.record)
    }

    /// Number of live conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no conversations are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all live conversations, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}
