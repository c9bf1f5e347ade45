use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::metrics::{ANSWERS_PENDING, ANSWER_SAVES_TOTAL};
use crate::models::{AnswerEntry, AnswerStatus, AnswerValue, SaveAnswerRequest};
use crate::services::api_client::ExamApi;
use crate::utils::scheduler::{lock, KeyedScheduler};

struct Draft {
    seq: u64,
    value: AnswerValue,
}

#[derive(Default)]
struct SyncState {
    next_seq: u64,
    drafts: HashMap<String, Draft>,
    answers: HashMap<String, AnswerEntry>,
    /// Sequence number of the newest submission reflected in `answers`.
    written: HashMap<String, u64>,
    /// This instance's share of the process-wide pending gauge.
    reported_pending: i64,
}

impl SyncState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct SyncInner {
    api: Arc<dyn ExamApi>,
    attempt_id: String,
    debounce: Duration,
    scheduler: KeyedScheduler<String>,
    state: Mutex<SyncState>,
}

/// Per-question buffered answer persistence.
///
/// Every submission gets a sequence number; a save that completes after a
/// newer one for the same question never overwrites the newer answer.
#[derive(Clone)]
pub struct AnswerSync {
    inner: Arc<SyncInner>,
}

impl AnswerSync {
    pub fn new(api: Arc<dyn ExamApi>, attempt_id: impl Into<String>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                api,
                attempt_id: attempt_id.into(),
                debounce,
                scheduler: KeyedScheduler::new("answer-debounce"),
                state: Mutex::new(SyncState::default()),
            }),
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.inner.attempt_id
    }

    /// `immediate` answers (choices, checkboxes) are saved before this
    /// returns; typed answers wait for the debounce window to go quiet.
    pub async fn submit_answer(
        &self,
        question_id: &str,
        answer: AnswerValue,
        immediate: bool,
    ) -> AnswerStatus {
        let key = question_id.to_string();

        if immediate {
            self.inner.scheduler.cancel(&key);
            let seq = {
                let mut state = lock(&self.inner.state);
                state.drafts.remove(&key);
                let seq = state.bump();
                state.answers.insert(
                    key.clone(),
                    AnswerEntry::new(answer.clone(), AnswerStatus::Pending),
                );
                state.written.insert(key.clone(), seq);
                update_pending_gauge(&mut state);
                seq
            };
            return self.persist(&key, answer, seq, "immediate").await;
        }

        {
            let mut state = lock(&self.inner.state);
            let seq = state.bump();
            state.drafts.insert(key.clone(), Draft { seq, value: answer });
            update_pending_gauge(&mut state);
        }

        let sync = self.clone();
        let job_key = key.clone();
        self.inner
            .scheduler
            .schedule(key, self.inner.debounce, async move {
                sync.fire(&job_key).await;
            });
        AnswerStatus::Pending
    }

    async fn fire(&self, question_id: &str) {
        let draft = {
            let mut state = lock(&self.inner.state);
            let draft = state.drafts.remove(question_id);
            update_pending_gauge(&mut state);
            draft
        };
        if let Some(draft) = draft {
            self.persist(question_id, draft.value, draft.seq, "debounced")
                .await;
        }
    }

    async fn persist(
        &self,
        question_id: &str,
        value: AnswerValue,
        seq: u64,
        mode: &str,
    ) -> AnswerStatus {
        let request = SaveAnswerRequest {
            question_id: question_id.to_string(),
            answer: value.clone(),
        };

        let status = match self
            .inner
            .api
            .save_answer(&self.inner.attempt_id, &request)
            .await
        {
            Ok(true) => AnswerStatus::Saved,
            Ok(false) => {
                tracing::warn!(
                    "Backend rejected answer: attempt={}, question={}",
                    self.inner.attempt_id,
                    question_id
                );
                AnswerStatus::Failed
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to save answer: attempt={}, question={}, error={}",
                    self.inner.attempt_id,
                    question_id,
                    e
                );
                AnswerStatus::Failed
            }
        };

        let label = match status {
            AnswerStatus::Saved => "saved",
            _ => "failed",
        };
        ANSWER_SAVES_TOTAL.with_label_values(&[mode, label]).inc();

        let mut state = lock(&self.inner.state);
        let newest = state.written.get(question_id).copied().unwrap_or(0);
        if seq >= newest {
            state.written.insert(question_id.to_string(), seq);
            state
                .answers
                .insert(question_id.to_string(), AnswerEntry::new(value, status));
        } else {
            tracing::debug!(
                "Discarding stale save result for question {} (seq {} < {})",
                question_id,
                seq,
                newest
            );
        }
        status
    }

    /// Saves every debounced answer now. Returns how many were flushed.
    pub async fn flush_pending(&self) -> usize {
        let drafts: Vec<(String, Draft)> = {
            let mut state = lock(&self.inner.state);
            let drafts = state.drafts.drain().collect();
            update_pending_gauge(&mut state);
            drafts
        };
        for (question_id, _) in &drafts {
            self.inner.scheduler.cancel(question_id);
        }

        let count = drafts.len();
        if count > 0 {
            tracing::debug!("Flushing {} pending answers", count);
        }
        for (question_id, draft) in drafts {
            self.persist(&question_id, draft.value, draft.seq, "flush")
                .await;
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.state).drafts.len()
    }

    pub fn answers(&self) -> HashMap<String, AnswerEntry> {
        lock(&self.inner.state).answers.clone()
    }

    pub fn answer(&self, question_id: &str) -> Option<AnswerValue> {
        lock(&self.inner.state)
            .answers
            .get(question_id)
            .map(|entry| entry.value.clone())
    }

    /// `Pending` while a debounced save is outstanding.
    pub fn status(&self, question_id: &str) -> Option<AnswerStatus> {
        let state = lock(&self.inner.state);
        if state.drafts.contains_key(question_id) {
            return Some(AnswerStatus::Pending);
        }
        state.answers.get(question_id).map(|entry| entry.status)
    }

    /// Loads answers the server already holds. Questions with a pending
    /// draft keep the draft. Returns how many were seeded.
    pub fn seed<I>(&self, answers: I) -> usize
    where
        I: IntoIterator<Item = (String, AnswerValue)>,
    {
        let mut state = lock(&self.inner.state);
        let mut seeded = 0;
        for (question_id, value) in answers {
            if state.drafts.contains_key(&question_id) {
                continue;
            }
            state
                .answers
                .insert(question_id, AnswerEntry::new(value, AnswerStatus::Saved));
            seeded += 1;
        }
        seeded
    }

    /// Drops pending debounces without saving them.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.scheduler.cancel_all();
        let mut state = lock(&self.inner.state);
        state.drafts.clear();
        update_pending_gauge(&mut state);
        cancelled
    }
}

/// Moves the shared gauge by this instance's change only, so concurrent
/// attempts add up instead of overwriting each other.
fn update_pending_gauge(state: &mut SyncState) {
    let pending = state.drafts.len() as i64;
    ANSWERS_PENDING.add(pending - state.reported_pending);
    state.reported_pending = pending;
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        let state = lock(&self.state);
        ANSWERS_PENDING.sub(state.reported_pending);
    }
}
