#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use ielts_exam_runtime::browser::{EventBus, HeadlessBrowser};
use ielts_exam_runtime::config::RuntimeSettings;
use ielts_exam_runtime::dom::{Document, SharedDocument};
use ielts_exam_runtime::error::{RuntimeError, RuntimeResult};
use ielts_exam_runtime::models::{
    AdvanceResponse, SaveAnswerRequest, SectionPayload, SectionType, TimerEvent,
};
use ielts_exam_runtime::services::highlight::MemoryStore;
use ielts_exam_runtime::services::{ExamApi, ExamSession, SessionDeps, SessionPrompt};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Lets spawned timer jobs run after `tokio::time::advance`.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn payload(value: serde_json::Value) -> SectionPayload {
    serde_json::from_value(value).expect("valid section payload")
}

fn unavailable(endpoint: &str) -> RuntimeError {
    RuntimeError::BadResponse {
        endpoint: endpoint.to_string(),
        status: 503,
        message: "service unavailable".to_string(),
    }
}

/// In-memory backend that records every call.
#[derive(Default)]
pub struct FakeExamApi {
    pub sections: Mutex<HashMap<SectionType, SectionPayload>>,
    pub saves: Mutex<Vec<SaveAnswerRequest>>,
    pub fail_saves: AtomicBool,
    pub fetch_failures: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub advances: Mutex<VecDeque<AdvanceResponse>>,
    pub advance_calls: AtomicUsize,
    /// `false` entries fail the matching submit call; empty means success.
    pub submit_results: Mutex<VecDeque<bool>>,
    pub submit_calls: AtomicUsize,
    pub writing: Mutex<Vec<(String, String)>>,
    pub speaking: Mutex<Vec<(String, usize)>>,
}

impl FakeExamApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_section(self: &Arc<Self>, section: SectionType, payload: SectionPayload) {
        self.sections.lock().unwrap().insert(section, payload);
    }

    pub fn saved_values(&self) -> Vec<(String, String)> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .map(|s| {
                let value = match &s.answer {
                    ielts_exam_runtime::models::AnswerValue::Text(text) => text.clone(),
                    other => serde_json::to_string(other).unwrap(),
                };
                (s.question_id.clone(), value)
            })
            .collect()
    }

    pub fn submit_count(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExamApi for FakeExamApi {
    async fn fetch_section(
        &self,
        _attempt_id: &str,
        section: SectionType,
    ) -> RuntimeResult<SectionPayload> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable("sections"));
        }
        self.sections
            .lock()
            .unwrap()
            .get(&section)
            .cloned()
            .ok_or_else(|| RuntimeError::BadResponse {
                endpoint: "sections".to_string(),
                status: 404,
                message: format!("no {} section", section),
            })
    }

    async fn save_answer(
        &self,
        _attempt_id: &str,
        request: &SaveAnswerRequest,
    ) -> RuntimeResult<bool> {
        self.saves.lock().unwrap().push(request.clone());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(unavailable("answers"));
        }
        Ok(true)
    }

    async fn submit_writing(
        &self,
        _attempt_id: &str,
        task_id: &str,
        text: &str,
    ) -> RuntimeResult<serde_json::Value> {
        self.writing
            .lock()
            .unwrap()
            .push((task_id.to_string(), text.to_string()));
        Ok(serde_json::json!({ "status": "received" }))
    }

    async fn submit_speaking(
        &self,
        _attempt_id: &str,
        question_key: &str,
        audio: Vec<u8>,
    ) -> RuntimeResult<serde_json::Value> {
        self.speaking
            .lock()
            .unwrap()
            .push((question_key.to_string(), audio.len()));
        Ok(serde_json::json!({ "status": "received" }))
    }

    async fn advance_section(&self, _attempt_id: &str) -> RuntimeResult<AdvanceResponse> {
        self.advance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .advances
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AdvanceResponse::Completed))
    }

    async fn submit_final(&self, _attempt_id: &str) -> RuntimeResult<bool> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match self.submit_results.lock().unwrap().pop_front() {
            Some(false) => Err(unavailable("submit")),
            _ => Ok(true),
        }
    }
}

/// Scripted student answers to confirmations and retry dialogs.
pub struct ScriptedPrompt {
    pub confirm: AtomicBool,
    pub confirm_calls: AtomicUsize,
    pub retries: Mutex<VecDeque<bool>>,
    pub retry_calls: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(confirm: bool) -> Arc<Self> {
        Arc::new(Self {
            confirm: AtomicBool::new(confirm),
            confirm_calls: AtomicUsize::new(0),
            retries: Mutex::new(VecDeque::new()),
            retry_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionPrompt for ScriptedPrompt {
    async fn confirm_advance(&self, _from: SectionType) -> bool {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirm.load(Ordering::SeqCst)
    }

    async fn retry_submission(&self, _error: &str) -> bool {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        self.retries.lock().unwrap().pop_front().unwrap_or(false)
    }
}

pub struct TestSession {
    pub session: ExamSession,
    pub timer_events: mpsc::UnboundedReceiver<TimerEvent>,
    pub api: Arc<FakeExamApi>,
    pub prompt: Arc<ScriptedPrompt>,
    pub browser: Arc<HeadlessBrowser>,
    pub store: Arc<MemoryStore>,
    pub document: SharedDocument,
    pub bus: EventBus,
}

pub fn session_with(
    attempt_id: &str,
    api: Arc<FakeExamApi>,
    browser: HeadlessBrowser,
    prompt: Arc<ScriptedPrompt>,
) -> TestSession {
    init_tracing();
    let browser = Arc::new(browser);
    let store = Arc::new(MemoryStore::new());
    let document = Document::new().into_shared();
    let bus = EventBus::new();

    let deps = SessionDeps {
        api: api.clone(),
        browser: browser.clone(),
        prompt: prompt.clone(),
        store: store.clone(),
        document: document.clone(),
        bus: bus.clone(),
        settings: RuntimeSettings::default(),
    };
    let (session, timer_events) = ExamSession::new(attempt_id, deps);

    TestSession {
        session,
        timer_events,
        api,
        prompt,
        browser,
        store,
        document,
        bus,
    }
}
