use std::collections::HashMap;

use serde::Serialize;

use crate::models::{AnswerEntry, AnswerValue, SectionPayload, SectionType};
use crate::services::answer_sync::AnswerSync;

/// One cell of the question navigation palette.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaletteEntry {
    pub number: u32,
    pub question_id: String,
    pub block_id: String,
    pub answered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
}

impl Progress {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.answered)
    }
}

/// Last payload per section, plus the walks over it.
#[derive(Debug, Default)]
pub struct SectionCache {
    payloads: HashMap<SectionType, SectionPayload>,
}

impl SectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, section: SectionType, payload: SectionPayload) {
        self.payloads.insert(section, payload);
    }

    pub fn get(&self, section: SectionType) -> Option<&SectionPayload> {
        self.payloads.get(&section)
    }
}

/// Non-empty answers the payload already carries. Missing groups and
/// questions simply contribute nothing.
pub fn prior_answers(payload: &SectionPayload) -> Vec<(String, AnswerValue)> {
    payload
        .questions()
        .filter_map(|question| {
            question
                .user_answer
                .as_ref()
                .filter(|answer| !answer.is_empty())
                .map(|answer| (question.id.clone(), answer.clone()))
        })
        .collect()
}

/// Seeds `sync` with the payload's prior answers. Returns how many.
pub fn restore_answers(payload: &SectionPayload, sync: &AnswerSync) -> usize {
    let seeded = sync.seed(prior_answers(payload));
    tracing::debug!(
        "Restored {} prior answers out of {} questions",
        seeded,
        payload.question_count()
    );
    seeded
}

pub fn palette(payload: &SectionPayload, answers: &HashMap<String, AnswerEntry>) -> Vec<PaletteEntry> {
    payload
        .blocks
        .iter()
        .flat_map(|block| {
            block
                .groups
                .iter()
                .flat_map(|group| group.questions.iter())
                .filter(|question| question.has_id())
                .map(move |question| PaletteEntry {
                    number: question.order,
                    question_id: question.id.clone(),
                    block_id: block.id.clone(),
                    answered: answers
                        .get(&question.id)
                        .map(|entry| !entry.value.is_empty())
                        .unwrap_or(false),
                })
        })
        .collect()
}

pub fn progress(payload: &SectionPayload, answers: &HashMap<String, AnswerEntry>) -> Progress {
    let entries = palette(payload, answers);
    Progress {
        answered: entries.iter().filter(|e| e.answered).count(),
        total: entries.len(),
    }
}

/// Groups whose `order` values do not strictly increase. Each is logged;
/// display still follows payload order.
pub fn order_warnings(payload: &SectionPayload) -> Vec<String> {
    let mut warnings = Vec::new();
    for group in payload.blocks.iter().flat_map(|block| block.groups.iter()) {
        let broken = group
            .questions
            .windows(2)
            .any(|pair| pair[1].order <= pair[0].order);
        if broken {
            let message = format!("question order does not increase in group {}", group.id);
            tracing::warn!("{}", message);
            warnings.push(message);
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerStatus;
    use serde_json::json;

    fn payload() -> SectionPayload {
        serde_json::from_value(json!({
            "section_name": "reading",
            "passages": [
                {
                    "id": "p1",
                    "question_groups": [
                        {
                            "id": "g1",
                            "questions": [
                                { "id": "q1", "order": 1, "user_answer": "TRUE" },
                                { "id": "q2", "order": 2, "user_answer": "" },
                                { "id": "q3", "order": 3 }
                            ]
                        }
                    ]
                },
                { "id": "p2" },
                {
                    "id": "p3",
                    "question_groups": [
                        { "id": "g2", "questions": [
                            { "id": "q14", "order": 14, "answer": {"1": "iv"} },
                            { "id": "q13", "order": 13 }
                        ] },
                        { "id": "g3" }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn prior_answers_skip_empty_and_missing() {
        let answers = prior_answers(&payload());
        let ids: Vec<&str> = answers.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q14"]);
    }

    #[test]
    fn palette_numbers_follow_order() {
        let mut answers = HashMap::new();
        answers.insert(
            "q3".to_string(),
            AnswerEntry::new(AnswerValue::text("A"), AnswerStatus::Saved),
        );
        let entries = palette(&payload(), &answers);
        let numbers: Vec<u32> = entries.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 14, 13]);
        assert!(entries[2].answered);
        assert_eq!(entries[3].block_id, "p3");

        assert_eq!(
            progress(&payload(), &answers),
            Progress {
                answered: 1,
                total: 5
            }
        );
    }

    #[test]
    fn decreasing_order_is_reported() {
        let warnings = order_warnings(&payload());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("g2"));
    }
}
