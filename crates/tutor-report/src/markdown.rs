//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`ConversationReport`] as a human-readable
//! document with these sections:
//!
//! - A summary table
//! - The baseline assessment
//! - Teaching statistics
//! - The transcript, one row per turn
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{ConversationReport, MarkdownGenerator};
//!
//! let report = ConversationReport::default();
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.contains("# Tutoring Report"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::{ConversationReport, TurnSummary};

/// Maximum characters of a message shown in the transcript table.
const MAX_MESSAGE_DISPLAY_LENGTH: usize = 120;

/// Generates Markdown reports.
pub struct MarkdownGenerator<'a> {
    report: &'a ConversationReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ConversationReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_assessment(&mut output);
        self.write_teaching(&mut output);
        self.write_transcript(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let topic = if self.report.topic.name.is_empty() {
            "Untitled topic".to_string()
        } else {
            escape_markdown(&self.report.topic.name)
        };
        let _ = writeln!(output, "# Tutoring Report: {topic}\n");
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let student = if report.student.name.is_empty() {
            escape_markdown(&report.student_id)
        } else {
            escape_markdown(&report.student.name)
        };

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(
            output,
            "| Conversation | {} |",
            escape_markdown(&report.conversation_id)
        );
        let _ = writeln!(
            output,
            "| Student | {student} (grade {}) |",
            report.student.grade_level
        );
        let _ = writeln!(
            output,
            "| Subject | {} |",
            or_dash(&escape_markdown(&report.topic.subject_name))
        );
        let _ = writeln!(output, "| Status | {} |", report.summary.status);
        let _ = writeln!(
            output,
            "| Turns | {} / {} |",
            report.summary.turn_count, report.summary.max_turns
        );
        let _ = writeln!(output);
    }

    fn write_assessment(&self, output: &mut String) {
        let assessment = &self.report.assessment;

        let _ = writeln!(output, "## Baseline Assessment\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        match assessment.level {
            Some(level) => {
                let _ = writeln!(output, "| Level | {level} ({}) |", assessment.label);
            }
            None => {
                let _ = writeln!(output, "| Level | {} |", assessment.label);
            }
        }
        let confidence = assessment
            .confidence
            .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"));
        let _ = writeln!(output, "| Confidence | {confidence} |");
        let _ = writeln!(
            output,
            "| Locked | {} |",
            if assessment.locked { "Yes" } else { "No" }
        );
        let _ = writeln!(output);

        if !assessment.evidence.is_empty() {
            let _ = writeln!(
                output,
                "**Evidence**: {}\n",
                escape_markdown(&assessment.evidence)
            );
        }
    }

    fn write_teaching(&self, output: &mut String) {
        let teaching = &self.report.teaching;

        let _ = writeln!(output, "## Teaching Statistics\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Tutor Messages | {} |", teaching.tutor_messages);
        let _ = writeln!(output, "| Student Replies | {} |", teaching.student_replies);
        let _ = writeln!(
            output,
            "| Substantial Teaching | {} |",
            teaching.substantial_messages
        );
        let _ = writeln!(output, "| Questions Asked | {} |", teaching.questions_asked);
        let _ = writeln!(
            output,
            "| Avg Tutor Length | {:.1} chars |",
            teaching.avg_tutor_chars
        );
        let _ = writeln!(
            output,
            "| Avg Student Length | {:.1} chars |",
            teaching.avg_student_chars
        );
        let _ = writeln!(output);
    }

    fn write_transcript(&self, output: &mut String) {
        let _ = writeln!(output, "## Transcript\n");

        if self.report.turns.is_empty() {
            let _ = writeln!(output, "*No turns recorded.*\n");
            return;
        }

        let _ = writeln!(output, "| Turn | Tutor | Student |");
        let _ = writeln!(output, "|------|-------|---------|");
        for turn in &self.report.turns {
            Self::write_turn(output, turn);
        }
        let _ = writeln!(output);
    }

    fn write_turn(output: &mut String, turn: &TurnSummary) {
        let marker = if turn.substantial { " *" } else { "" };
        let tutor = escape_markdown(&truncate(&turn.tutor_message, MAX_MESSAGE_DISPLAY_LENGTH));
        let student = turn.student_reply.as_deref().map_or_else(
            || "*no reply*".to_string(),
            |reply| escape_markdown(&truncate(reply, MAX_MESSAGE_DISPLAY_LENGTH)),
        );
        let _ = writeln!(output, "| {}{marker} | {tutor} | {student} |", turn.turn);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&self.report.generated_at);
        let _ = writeln!(output, "*Generated at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats a timestamp as "YYYY-MM-DD HH:MM:SS UTC".
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Escapes special Markdown characters so content renders literally.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            // Table cells cannot hold raw newlines
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Cuts `text` to `max_chars` characters, adding an ellipsis if it was longer.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
