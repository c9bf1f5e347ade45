use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod answer;
pub mod highlight;
pub mod integrity;
pub mod section;
pub mod timer;

pub use answer::{AnswerEntry, AnswerStatus, AnswerValue, SaveAnswerRequest};
pub use highlight::{Highlight, HighlightColor, TextFormat};
pub use integrity::{IntegrityEvent, PermissionKind, PermissionState, ViolationKind};
pub use section::{AdvanceResponse, ContentBlock, Question, QuestionGroup, SectionPayload};
pub use timer::{TimeExpired, TimerEvent, TimerPhase, TimerState, TimerTick};

/// One skill module of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionType {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl SectionType {
    pub const ALL: [SectionType; 4] = [
        SectionType::Listening,
        SectionType::Reading,
        SectionType::Writing,
        SectionType::Speaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Listening => "LISTENING",
            SectionType::Reading => "READING",
            SectionType::Writing => "WRITING",
            SectionType::Speaking => "SPEAKING",
        }
    }

    /// Path segment used by the REST backend.
    pub fn slug(&self) -> &'static str {
        match self {
            SectionType::Listening => "listening",
            SectionType::Reading => "reading",
            SectionType::Writing => "writing",
            SectionType::Speaking => "speaking",
        }
    }

    /// Countdown used when the server does not send `time_remaining`.
    pub fn default_duration(&self) -> Duration {
        let minutes = match self {
            SectionType::Listening => 40,
            SectionType::Reading => 60,
            SectionType::Writing => 60,
            SectionType::Speaking => 15,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Accepts both the wire names (`READING`) and the lowercase section
    /// names the backend puts in `next_section_name`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LISTENING" => Some(SectionType::Listening),
            "READING" => Some(SectionType::Reading),
            "WRITING" => Some(SectionType::Writing),
            "SPEAKING" => Some(SectionType::Speaking),
            _ => None,
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's run through an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_id: String,
    pub current_section_type: SectionType,
    pub time_remaining_seconds: u32,
}

impl Attempt {
    pub fn new(attempt_id: impl Into<String>, section: SectionType) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            current_section_type: section,
            time_remaining_seconds: section.default_duration().as_secs() as u32,
        }
    }
}
