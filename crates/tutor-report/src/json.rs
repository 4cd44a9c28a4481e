//! JSON report generation.
//!
//! [`JsonGenerator`] serializes a [`ConversationReport`] either as compact
//! single-line JSON or pretty-printed.
//!
//! # Example
//!
//! ```rust
//! use tutor_report::{ConversationReport, json::JsonGenerator};
//!
//! let report = ConversationReport::default();
//! let generator = JsonGenerator::new(&report);
//!
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//!
//! let pretty = generator.generate_pretty().unwrap();
//! assert!(pretty.contains("\"summary\""));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{ConversationReport, ReportError, Result};

/// JSON report generator.
pub struct JsonGenerator<'a> {
    report: &'a ConversationReport,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ConversationReport) -> Self {
        Self { report }
    }

    /// Generates compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the JSON report to `path`, creating or overwriting the file.
    ///
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tutor_report::{ConversationReport, json::JsonGenerator};
    /// use std::path::Path;
    ///
    /// let report = ConversationReport::default();
    /// JsonGenerator::new(&report)
    ///     .write_to_file(Path::new("conversation-report.json"), true)
    ///     .unwrap();
    /// ```
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{ReportGenerator, ReportInput, ReportMetadata, ReportRole, ReportTurn};
    use std::io::Read;

    fn sample_report() -> ConversationReport {
        let input = ReportInput {
            conversation_id: "conv-7".to_string(),
            messages: vec![
                ReportTurn::new(ReportRole::Tutor, "Can you name a prime number?"),
                ReportTurn::new(ReportRole::Student, "7"),
            ],
            understanding_level: Some(2),
            confidence: Some(0.55),
            metadata: ReportMetadata {
                turn_count: 1,
                max_turns: 4,
                conversation_ended: true,
            },
            ..Default::default()
        };
        ReportGenerator::new(&input).generate().unwrap()
    }

    #[test]
    fn test_generate_compact_json() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();

        // Compact JSON should not have newlines
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""conversation_id":"conv-7""#));
        assert!(json.contains(r#""status":"completed""#));
        assert!(json.contains(r#""level":2"#));
    }

    #[test]
    fn test_json_contains_all_top_level_fields() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate_pretty().unwrap();

        for field in [
            "\"conversation_id\"",
            "\"student\"",
            "\"topic\"",
            "\"summary\"",
            "\"assessment\"",
            "\"turns\"",
            "\"teaching\"",
            "\"generated_at\"",
        ] {
            assert!(json.contains(field), "missing {field}");
        }
    }

    #[test]
    fn test_json_parses_back() {
        let report = sample_report();
        let json = JsonGenerator::new(&report).generate().unwrap();
        let parsed: ConversationReport = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.conversation_id, "conv-7");
        assert_eq!(parsed.turns, report.turns);
        assert_eq!(parsed.assessment, report.assessment);
    }

    #[test]
    fn test_write_to_file() {
        let report = sample_report();
        let generator = JsonGenerator::new(&report);

        let file_path = std::env::temp_dir().join("tutor-test-report.json");
        generator.write_to_file(&file_path, true).unwrap();

        let mut contents = String::new();
        File::open(&file_path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains('\n'));
        assert!(contents.contains("\"conv-7\""));

        std::fs::remove_file(&file_path).unwrap();
    }

    #[test]
    fn test_write_to_file_invalid_path() {
        let report = sample_report();
        let result = JsonGenerator::new(&report)
            .write_to_file(Path::new("/nonexistent/dir/report.json"), true);

        assert!(matches!(result, Err(ReportError::Io(_))));
    }
}
