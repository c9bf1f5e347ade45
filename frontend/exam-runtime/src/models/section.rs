use serde::{Deserialize, Deserializer, Serialize};

use super::answer::AnswerValue;

/// Reads `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any JSON number, clamped into `u32`; negatives become 0.
fn clamped_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(clamped_seconds(deserializer)?.unwrap_or_default())
}

fn clamped_seconds<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|v| v.clamp(0.0, u32::MAX as f64) as u32))
}

/// Content and structure of one section as returned by the backend.
///
/// Sparse by contract: every field tolerates being missing or `null`, and
/// numbers out of range are clamped rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionPayload {
    #[serde(default)]
    pub section_name: Option<String>,
    #[serde(
        default,
        alias = "passages",
        alias = "parts",
        deserialize_with = "null_as_default"
    )]
    pub blocks: Vec<ContentBlock>,
    #[serde(default, deserialize_with = "clamped_seconds")]
    pub time_remaining: Option<u32>,
    #[serde(default)]
    pub next_section_name: Option<String>,
}

/// A reading passage or a listening part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(
        default,
        alias = "question_groups",
        deserialize_with = "null_as_default"
    )]
    pub groups: Vec<QuestionGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionGroup {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub group_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "clamped_u32")]
    pub order: u32,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "answer")]
    pub user_answer: Option<AnswerValue>,
}

impl Question {
    /// Questions without an id cannot be answered or saved.
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

impl SectionPayload {
    /// Every addressable question, in payload order.
    pub fn questions(&self) -> impl Iterator<Item = &Question> {
        self.blocks
            .iter()
            .flat_map(|block| block.groups.iter())
            .flat_map(|group| group.questions.iter())
            .filter(|question| question.has_id())
    }

    pub fn question_count(&self) -> usize {
        self.questions().count()
    }

    pub fn is_last(&self) -> bool {
        self.next_section_name
            .as_deref()
            .map(|name| name.trim().is_empty())
            .unwrap_or(true)
    }
}

/// Reply of the section-advance endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceResponse {
    Next(String),
    Completed,
}

impl AdvanceResponse {
    /// The backend answers `{ "current_section": "reading" }` or
    /// `{ "current_section": "COMPLETED" }`.
    pub fn from_current_section(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case("completed") => {
                AdvanceResponse::Next(name.to_string())
            }
            _ => AdvanceResponse::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sparse_payload_deserializes() {
        let payload: SectionPayload = serde_json::from_value(json!({
            "passages": [
                { "id": "p1" },
                { "id": "p2", "question_groups": [ { "id": "g1" } ] }
            ]
        }))
        .unwrap();

        assert_eq!(payload.blocks.len(), 2);
        assert_eq!(payload.question_count(), 0);
        assert!(payload.is_last());
        assert!(payload.time_remaining.is_none());
    }

    #[test]
    fn nulls_and_out_of_range_numbers_are_tolerated() {
        let payload: SectionPayload = serde_json::from_value(json!({
            "section_name": null,
            "time_remaining": -5,
            "passages": [
                { "id": "p1", "question_groups": null },
                { "id": null, "question_groups": [
                    { "id": "g1", "questions": null },
                    { "id": "g2", "questions": [
                        { "id": "q1", "order": null, "user_answer": null },
                        { "order": 2, "user_answer": "TRUE" },
                        { "id": "q3", "order": 3.0 }
                    ] }
                ] }
            ]
        }))
        .unwrap();

        assert_eq!(payload.time_remaining, Some(0));
        assert_eq!(payload.blocks.len(), 2);
        assert!(payload.blocks[0].groups.is_empty());
        assert_eq!(payload.blocks[1].id, "");
        let ids: Vec<(&str, u32)> = payload
            .questions()
            .map(|q| (q.id.as_str(), q.order))
            .collect();
        assert_eq!(ids, vec![("q1", 0), ("q3", 3)]);
        assert_eq!(payload.question_count(), 2);
    }

    #[test]
    fn advance_response_recognizes_completion() {
        assert_eq!(
            AdvanceResponse::from_current_section(Some("COMPLETED")),
            AdvanceResponse::Completed
        );
        assert_eq!(
            AdvanceResponse::from_current_section(None),
            AdvanceResponse::Completed
        );
        assert_eq!(
            AdvanceResponse::from_current_section(Some("writing")),
            AdvanceResponse::Next("writing".to_string())
        );
    }
}
