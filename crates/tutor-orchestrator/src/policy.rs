//! Termination and locking policy.
//!
//! Pure decisions over a [`ConversationRecord`]: whether to (re)assess,
//! whether the conversation is over, which early slice of the transcript
//! counts as the baseline, and whether an estimate is strong enough to lock.

use serde::Serialize;

use crate::config::AssessmentConfig;
use crate::error::{Result, TutorError};
use crate::record::{ConversationRecord, Role, Turn};

/// Returns `true` when the record is unlocked and the student has spoken.
#[must_use]
pub fn should_assess(record: &ConversationRecord) -> bool {
    !record.is_locked() && record.student_turn_count() > 0
}

/// Returns `true` when no further turn may run.
#[must_use]
pub const fn is_terminal(record: &ConversationRecord) -> bool {
    record.is_ended() || record.turn_count() >= record.max_turns()
}

/// Rejects a turn on a terminal record.
///
/// # Errors
///
/// `ConversationEnded` if the record ended, otherwise `TurnLimitReached` if
/// the turn ceiling is used up.
pub fn ensure_turn_allowed(record: &ConversationRecord) -> Result<()> {
    if record.is_ended() {
        return Err(TutorError::conversation_ended(record.conversation_id()));
    }
    if record.turn_count() >= record.max_turns() {
        return Err(TutorError::turn_limit(
            record.conversation_id(),
            record.max_turns(),
        ));
    }
    Ok(())
}

/// The early portion of a transcript used for baseline assessment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaselineWindow {
    /// Turns inside the window, in order.
    pub turns: Vec<Turn>,
    /// Student turns inside the window.
    pub student_turns: usize,
    /// Tutor turns inside the window that count as substantial teaching.
    pub substantial_teaching: usize,
}

/// Thresholds for the baseline window and the lock decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssessmentPolicy {
    /// A tutor turn longer than this many characters is substantial teaching.
    pub substantial_teaching_chars: usize,
    /// The window closes at this student turn.
    pub max_student_turns: usize,
    /// The window closes at this substantial tutor turn.
    pub max_substantial_teaching: usize,
    /// Minimum confidence for a derived lock.
    pub lock_confidence: f64,
}

impl Default for AssessmentPolicy {
    fn default() -> Self {
        Self {
            substantial_teaching_chars: 100,
            max_student_turns: 3,
            max_substantial_teaching: 2,
            lock_confidence: 0.7,
        }
    }
}

impl From<&AssessmentConfig> for AssessmentPolicy {
    fn from(config: &AssessmentConfig) -> Self {
        Self {
            substantial_teaching_chars: config.substantial_teaching_chars,
            max_student_turns: config.max_student_turns,
            max_substantial_teaching: config.max_substantial_teaching,
            lock_confidence: config.lock_confidence,
        }
    }
}

impl AssessmentPolicy {
    /// Returns `true` if a tutor message counts as substantial teaching.
    #[must_use]
    pub fn is_substantial(&self, text: &str) -> bool {
        text.chars().count() > self.substantial_teaching_chars
    }

    /// Cuts the baseline window out of a transcript.
    ///
    /// The window holds every turn up to and including whichever comes first:
    /// the `max_student_turns`-th student turn or the
    /// `max_substantial_teaching`-th substantial tutor turn.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_orchestrator::{AssessmentPolicy, Turn};
    ///
    /// let transcript = vec![
    ///     Turn::tutor("Hi"), Turn::student("a"),
    ///     Turn::tutor("Ok"), Turn::student("b"),
    ///     Turn::tutor("So"), Turn::student("c"),
    ///     Turn::tutor("More"), Turn::student("d"),
    /// ];
    /// let window = AssessmentPolicy::default().baseline_window(&transcript);
    /// assert_eq!(window.turns.len(), 6);
    /// assert_eq!(window.student_turns, 3);
    /// ```
    #[must_use]
    pub fn baseline_window(&self, transcript: &[Turn]) -> BaselineWindow {
        let mut window = BaselineWindow::default();

        for turn in transcript {
            window.turns.push(turn.clone());
            match turn.role {
                Role::Student => {
                    window.student_turns += 1;
                    if window.student_turns >= self.max_student_turns {
                        break;
                    }
                }
                Role::Tutor => {
                    if self.is_substantial(&turn.text) {
                        window.substantial_teaching += 1;
                        if window.substantial_teaching >= self.max_substantial_teaching {
                            break;
                        }
                    }
                }
            }
        }

        window
    }

    /// Lock decision used when the oracle does not supply one.
    #[must_use]
    pub fn derive_should_lock(&self, confidence: f64, window: &BaselineWindow) -> bool {
        confidence >= self.lock_confidence
            && window.student_turns >= 1
            && window.substantial_teaching < self.max_substantial_teaching
    }
}
