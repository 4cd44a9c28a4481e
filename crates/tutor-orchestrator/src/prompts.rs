//! Prompt construction and reply parsing for the reasoning backend.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::assessment::AssessmentRequest;
use crate::record::{Role, Turn};
use crate::teaching::{TeachingRequest, TeachingStyle};

/// Matches a fenced code block holding a JSON object.
static FENCED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok());

const ASSESSMENT_SYSTEM: &str = "\
You are an experienced educational assessor. Read a conversation between a tutor \
and a student and judge the student's BASELINE understanding of the topic: what \
they knew before any tutoring began.

Judge only prior knowledge:
- Weigh the student's first answers, questions and misconceptions
- Disregard anything the student could have picked up from the tutor's explanations
- Once substantial teaching has happened, rely only on the replies that came before it

Levels:
1 - Struggling: large gaps, needs the fundamentals
2 - Below grade: frequent mistakes, needs extra support
3 - At grade: understands the core ideas with minor gaps
4 - Above grade: grasps the ideas well and reasons beyond them
5 - Advanced: strong command, ready for harder material

Decide whether the estimate is settled enough to freeze. It usually is when \
confidence is at least 0.7, at least one or two student replies were seen before \
substantial teaching, and the evidence points clearly at one level.

Reply with a JSON object with keys \"level\" (integer 1-5), \"confidence\" \
(number 0.0-1.0), \"evidence\" (string) and \"should_lock\" (boolean).";

const TEACHING_SYSTEM_HEADER: &str = "\
You are an expert tutor for secondary school students (ages 14-18). Help the \
student understand the topic through adaptive, personalised teaching.";

const TEACHING_SYSTEM_FOOTER: &str = "\
Guidelines:
- Be friendly, patient and encouraging
- Match your language to the student's level
- Use examples that fit the student's age
- Ask questions that check understanding
- Keep replies concise but complete
- Correct mistakes constructively
- Build on what the student already knows";

const OPENER_CONTEXT: &str = "This is the start of the conversation. Introduce the topic and find out what the student already knows about it.";

/// Renders a transcript as `ROLE: text` lines.
#[must_use]
pub fn render_transcript(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "No previous conversation.".to_string();
    }
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::Tutor => "TUTOR",
                Role::Student => "STUDENT",
            };
            format!("{speaker}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

/// System prompt for baseline assessment.
#[must_use]
pub const fn assessment_system_prompt() -> &'static str {
    ASSESSMENT_SYSTEM
}

/// User prompt for baseline assessment.
#[must_use]
pub fn assessment_user_prompt(request: &AssessmentRequest) -> String {
    format!(
        "Student Profile:\n- Name: {name}\n- Grade Level: {grade}\n\n\
         Topic: {topic}\nSubject: {subject}\n\n\
         Conversation History:\n{history}\n\n\
         Assess the student's baseline understanding level from this conversation.",
        name = or_placeholder(&request.student_profile.name, "Student"),
        grade = request.student_profile.grade_level,
        topic = or_placeholder(&request.topic_info.name, "the topic"),
        subject = or_placeholder(&request.topic_info.subject_name, "the subject"),
        history = render_transcript(&request.window.turns),
    )
}

/// System prompt for teaching at `style`.
#[must_use]
pub fn teaching_system_prompt(style: TeachingStyle) -> String {
    format!(
        "{TEACHING_SYSTEM_HEADER}\n\nTeaching style ({label}):\n{guidance}\n\n{TEACHING_SYSTEM_FOOTER}",
        label = style.label(),
        guidance = style.guidance(),
    )
}

/// User prompt for the next tutor message.
#[must_use]
pub fn teaching_user_prompt(request: &TeachingRequest) -> String {
    let context = match (&request.latest_student_turn, request.is_opener) {
        (Some(reply), false) => format!(
            "Student's Latest Response: {reply}\n\n\
             Respond to this answer with feedback, or carry on teaching."
        ),
        _ => OPENER_CONTEXT.to_string(),
    };

    format!(
        "Student Profile:\n- Name: {name}\n- Grade Level: {grade}\n\n\
         Topic: {topic}\nSubject: {subject}\n\
         Student's Understanding Level: {level}\n\n\
         Conversation History:\n{history}\n\n\
         {context}\n\n\
         Write your next message to the student. Address their latest answer if \
         there is one, keep teaching at the right level and check understanding.",
        name = or_placeholder(&request.student_profile.name, "Student"),
        grade = request.student_profile.grade_level,
        topic = or_placeholder(&request.topic_info.name, "the topic"),
        subject = or_placeholder(&request.topic_info.subject_name, "the subject"),
        level = request.level,
        history = render_transcript(&request.transcript),
    )
}

/// Pulls a JSON object out of a model reply.
///
/// Prefers a fenced code block, then falls back to the span from the first
/// `{` to the last `}`.
///
/// # Examples
///
/// ```
/// use tutor_orchestrator::prompts::extract_json;
///
/// assert_eq!(extract_json("```json\n{\"level\": 2}\n```"), Some("{\"level\": 2}"));
/// assert_eq!(extract_json("Sure: {\"level\": 4} done"), Some("{\"level\": 4}"));
/// assert_eq!(extract_json("no json here"), None);
/// ```
#[must_use]
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(captures) = FENCED_JSON.as_ref().and_then(|re| re.captures(text)) {
        if let Some(body) = captures.get(1) {
            return Some(body.as_str());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::BaselineWindow;
    use crate::record::{StudentProfile, TopicInfo, UnderstandingEstimate, UnderstandingLevel};

    #[test]
    fn test_render_transcript() {
        let turns = vec![Turn::tutor("Hi"), Turn::student("Hello")];
        assert_eq!(render_transcript(&turns), "TUTOR: Hi\nSTUDENT: Hello");
        assert_eq!(render_transcript(&[]), "No previous conversation.");
    }

    #[test]
    fn test_extract_json_prefers_fence() {
        let text = "Here {not this}\n```\n{\"level\": 3}\n```";
        assert_eq!(extract_json(text), Some("{\"level\": 3}"));
    }

    #[test]
    fn test_extract_json_rejects_reversed_braces() {
        assert_eq!(extract_json("} oops {"), None);
    }

    #[test]
    fn test_assessment_prompt_uses_window_only() {
        let request = AssessmentRequest {
            window: BaselineWindow {
                turns: vec![Turn::tutor("Q1"), Turn::student("A1")],
                student_turns: 1,
                substantial_teaching: 0,
            },
            student_profile: StudentProfile {
                name: "Dana".to_string(),
                grade_level: 11,
            },
            topic_info: TopicInfo {
                name: "Vectors".to_string(),
                subject_name: "Mathematics".to_string(),
                ..Default::default()
            },
            previous: UnderstandingEstimate::default(),
        };
        let prompt = assessment_user_prompt(&request);
        assert!(prompt.contains("- Name: Dana"));
        assert!(prompt.contains("Topic: Vectors"));
        assert!(prompt.contains("STUDENT: A1"));
        assert!(assessment_system_prompt().contains("\"should_lock\""));
    }

    #[test]
    fn test_teaching_prompts() {
        let request = TeachingRequest {
            transcript: Vec::new(),
            student_profile: StudentProfile::default(),
            topic_info: TopicInfo::default(),
            level: UnderstandingLevel::default(),
            style: TeachingStyle::AtGrade,
            latest_student_turn: None,
            is_opener: true,
        };
        let prompt = teaching_user_prompt(&request);
        assert!(prompt.contains("start of the conversation"));
        assert!(prompt.contains("Topic: the topic"));
        assert!(prompt.contains("Understanding Level: 3"));

        let system = teaching_system_prompt(TeachingStyle::Struggling);
        assert!(system.contains("Teaching style (Struggling)"));
        assert!(system.contains("fundamentals"));
    }

    #[test]
    fn test_teaching_prompt_with_latest_reply() {
        let request = TeachingRequest {
            transcript: vec![Turn::tutor("Q"), Turn::student("It's 5")],
            student_profile: StudentProfile::default(),
            topic_info: TopicInfo::default(),
            level: UnderstandingLevel::new(4).unwrap(),
            style: TeachingStyle::AboveGrade,
            latest_student_turn: Some("It's 5".to_string()),
            is_opener: false,
        };
        let prompt = teaching_user_prompt(&request);
        assert!(prompt.contains("Student's Latest Response: It's 5"));
    }
}
