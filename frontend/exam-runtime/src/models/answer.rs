use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format-dependent answer payload.
///
/// Free text and delimited multi-select answers travel as strings; matching
/// and table-completion answers are structured objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Structured(serde_json::Value),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerValue::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Structured(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::String(s) => s.trim().is_empty(),
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
                _ => false,
            },
        }
    }

    /// Splits a delimited multi-select answer (`"A,C"`) into its choices.
    pub fn choices(&self) -> Vec<String> {
        match self {
            AnswerValue::Text(s) => s
                .split(',')
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            AnswerValue::Structured(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerRequest {
    pub question_id: String,
    pub answer: AnswerValue,
}

/// Where an answer stands relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Pending,
    Saved,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub value: AnswerValue,
    pub status: AnswerStatus,
    pub updated_at: DateTime<Utc>,
}

impl AnswerEntry {
    pub fn new(value: AnswerValue, status: AnswerStatus) -> Self {
        Self {
            value,
            status,
            updated_at: Utc::now(),
        }
    }
}
