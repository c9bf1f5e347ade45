use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::browser::{BrowserCapabilities, BrowserEvent, EventBus, EventDisposition};
use crate::config::RuntimeSettings;
use crate::dom::{NodeId, SharedDocument};
use crate::error::RuntimeError;
use crate::metrics::{SECTION_TRANSITIONS_TOTAL, SUBMISSIONS_TOTAL};
use crate::models::{
    AdvanceResponse, AnswerEntry, AnswerStatus, AnswerValue, Attempt, PermissionKind,
    PermissionState, SectionPayload, SectionType, TimerEvent,
};
use crate::services::answer_sync::AnswerSync;
use crate::services::api_client::ExamApi;
use crate::services::highlight::{HighlightEngine, HighlightRepository, KeyValueStore};
use crate::services::integrity_guard::IntegrityGuard;
use crate::services::section_cache::{self, PaletteEntry, Progress, SectionCache};
use crate::services::section_timer::SectionTimer;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::scheduler::lock;

/// Decisions the runtime hands back to the student.
#[async_trait]
pub trait SessionPrompt: Send + Sync {
    /// Asked before a manual section advance.
    async fn confirm_advance(&self, from: SectionType) -> bool;

    /// Asked after a failed final submission; `true` retries.
    async fn retry_submission(&self, error: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Instructions,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The student declined the confirmation.
    Stayed,
    Advanced(SectionType),
    Completed,
    /// Final submission failed and the student gave up retrying.
    SubmissionCancelled,
}

pub struct SessionDeps {
    pub api: Arc<dyn ExamApi>,
    pub browser: Arc<dyn BrowserCapabilities>,
    pub prompt: Arc<dyn SessionPrompt>,
    pub store: Arc<dyn KeyValueStore>,
    pub document: SharedDocument,
    pub bus: EventBus,
    pub settings: RuntimeSettings,
}

struct SessionState {
    attempt: Attempt,
    phase: SessionPhase,
    container: Option<NodeId>,
    cache: SectionCache,
}

/// One student's attempt: wires answers, timer, integrity guard and
/// highlights together and drives section transitions.
pub struct ExamSession {
    api: Arc<dyn ExamApi>,
    prompt: Arc<dyn SessionPrompt>,
    document: SharedDocument,
    bus: EventBus,
    settings: RuntimeSettings,
    answers: AnswerSync,
    timer: SectionTimer,
    guard: IntegrityGuard,
    highlights: HighlightEngine,
    state: Mutex<SessionState>,
}

impl ExamSession {
    pub fn new(
        attempt_id: impl Into<String>,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let attempt_id = attempt_id.into();
        let SessionDeps {
            api,
            browser,
            prompt,
            store,
            document,
            bus,
            settings,
        } = deps;

        let answers = AnswerSync::new(api.clone(), attempt_id.clone(), settings.answer_debounce());
        let (timer, events) = SectionTimer::new(attempt_id.clone(), settings.timer_tick());
        let guard = IntegrityGuard::new(attempt_id.clone(), browser.clone(), bus.clone());
        let highlights = HighlightEngine::new(
            document.clone(),
            HighlightRepository::new(store),
            bus.clone(),
            browser,
            settings.clone(),
        );

        let engine = highlights.clone();
        guard.on_unload(move || {
            // In-memory state only; the store keeps highlights for a reload.
            engine.cleanup();
        });

        let session = Self {
            api,
            prompt,
            document,
            bus,
            settings,
            answers,
            timer,
            guard,
            highlights,
            state: Mutex::new(SessionState {
                attempt: Attempt::new(attempt_id, SectionType::Listening),
                phase: SessionPhase::Instructions,
                container: None,
                cache: SectionCache::new(),
            }),
        };
        (session, events)
    }

    pub fn attempt_id(&self) -> String {
        lock(&self.state).attempt.attempt_id.clone()
    }

    pub fn attempt(&self) -> Attempt {
        let mut attempt = lock(&self.state).attempt.clone();
        attempt.time_remaining_seconds = self.timer.remaining_seconds();
        attempt
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.state).phase
    }

    pub fn current_section(&self) -> SectionType {
        lock(&self.state).attempt.current_section_type
    }

    pub fn container(&self) -> Option<NodeId> {
        lock(&self.state).container
    }

    pub fn payload(&self, section: SectionType) -> Option<SectionPayload> {
        lock(&self.state).cache.get(section).cloned()
    }

    pub fn answers(&self) -> &AnswerSync {
        &self.answers
    }

    pub fn timer(&self) -> &SectionTimer {
        &self.timer
    }

    pub fn guard(&self) -> &IntegrityGuard {
        &self.guard
    }

    pub fn highlights(&self) -> &HighlightEngine {
        &self.highlights
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn dispatch(&self, event: &BrowserEvent) -> EventDisposition {
        self.bus.dispatch(event)
    }

    /// Fetches a section, seeds its answers, arms the timer and binds the
    /// highlight engine to the rendered content. The countdown starts with
    /// `begin` (first section) or right after an advance.
    pub async fn load_section(&self, section: SectionType) -> Result<()> {
        if section == SectionType::Speaking {
            let permission = self.guard.check_permission(PermissionKind::Microphone).await;
            if !permission.granted {
                return Err(RuntimeError::PermissionDenied(PermissionKind::Microphone).into());
            }
        }

        let attempt_id = self.attempt_id();
        let api = self.api.clone();
        let retry = RetryConfig {
            max_attempts: self.settings.section_fetch_attempts,
            ..RetryConfig::default()
        };
        let payload = retry_async_with_config(
            "fetch_section",
            retry,
            RuntimeError::is_transient,
            || {
                let api = api.clone();
                let attempt_id = attempt_id.clone();
                async move { api.fetch_section(&attempt_id, section).await }
            },
        )
        .await
        .with_context(|| format!("Failed to load {} section", section))?;

        section_cache::order_warnings(&payload);
        let seeded = section_cache::restore_answers(&payload, &self.answers);

        let remaining = payload
            .time_remaining
            .unwrap_or_else(|| section.default_duration().as_secs() as u32);
        self.timer.arm(section, remaining);

        let section_name = payload
            .section_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| section.slug().to_string());
        // Saves the outgoing section's marks before its nodes are released.
        self.highlights.cleanup();
        let container = self.mount_content(&section_name, &attempt_id, &payload)?;
        self.highlights.init(&section_name, container, &attempt_id);

        {
            let mut state = lock(&self.state);
            state.attempt.current_section_type = section;
            state.attempt.time_remaining_seconds = remaining;
            state.container = Some(container);
            state.cache.store(section, payload);
        }

        SECTION_TRANSITIONS_TOTAL
            .with_label_values(&[section.as_str(), "load"])
            .inc();
        tracing::info!(
            "Section loaded: attempt={}, section={}, remaining={}s, prior_answers={}",
            attempt_id,
            section,
            remaining,
            seeded
        );
        Ok(())
    }

    /// Replaces the previous section's content with this one's blocks.
    fn mount_content(
        &self,
        section_name: &str,
        attempt_id: &str,
        payload: &SectionPayload,
    ) -> Result<NodeId> {
        let previous = lock(&self.state).container.take();
        let mut doc = lock(&self.document);
        if let Some(previous) = previous {
            doc.remove(previous)?;
        }

        let container = doc.create_element("div");
        doc.set_attribute(container, "class", "exam-section")?;
        doc.set_attribute(container, "data-section", section_name)?;
        doc.set_attribute(container, "data-attempt", attempt_id)?;
        for block in &payload.blocks {
            let article = doc.create_element("article");
            doc.set_attribute(article, "data-block", &block.id)?;
            if let Some(title) = block.title.as_deref().filter(|t| !t.is_empty()) {
                let heading = doc.create_element("h2");
                let text = doc.create_text(title);
                doc.append_child(heading, text)?;
                doc.append_child(article, heading)?;
            }
            if let Some(content) = block.content.as_deref() {
                doc.append_html(article, content);
            }
            doc.append_child(container, article)?;
        }
        let root = doc.root();
        doc.append_child(root, container)?;
        Ok(container)
    }

    /// Leaves the instructions step: mounts the integrity guard, requests
    /// fullscreen and starts the countdown.
    pub async fn begin(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            match state.phase {
                SessionPhase::Instructions => state.phase = SessionPhase::InProgress,
                SessionPhase::InProgress => return Ok(()),
                SessionPhase::Completed => anyhow::bail!("Attempt is already submitted"),
            }
        }
        self.guard.mount();
        self.guard.set_session_active(true);
        self.start_section().await;
        Ok(())
    }

    async fn start_section(&self) {
        let fullscreen = self.guard.enter_exam().await;
        if !fullscreen.granted {
            tracing::debug!("Continuing without fullscreen: {:?}", fullscreen.error);
        }
        self.timer.start_timer();
    }

    pub async fn submit_answer(
        &self,
        question_id: &str,
        answer: AnswerValue,
        immediate: bool,
    ) -> AnswerStatus {
        self.answers
            .submit_answer(question_id, answer, immediate)
            .await
    }

    /// Reacts to timer output. Only expiry does anything.
    pub async fn handle_timer_event(&self, event: &TimerEvent) -> Result<Option<AdvanceOutcome>> {
        match event {
            TimerEvent::TimeExpired(expired) if expired.section == self.current_section() => {
                self.handle_time_up().await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Advances without asking the student.
    pub async fn handle_time_up(&self) -> Result<AdvanceOutcome> {
        tracing::info!(
            "Time is up: attempt={}, section={}",
            self.attempt_id(),
            self.current_section()
        );
        self.advance(true, "time_up").await
    }

    pub async fn advance_section(&self, skip_confirmation: bool) -> Result<AdvanceOutcome> {
        self.advance(skip_confirmation, "manual").await
    }

    async fn advance(&self, skip_confirmation: bool, trigger: &str) -> Result<AdvanceOutcome> {
        if self.phase() == SessionPhase::Completed {
            return Ok(AdvanceOutcome::Completed);
        }
        let current = self.current_section();
        if !skip_confirmation && !self.prompt.confirm_advance(current).await {
            return Ok(AdvanceOutcome::Stayed);
        }

        self.timer.stop_timer();
        self.answers.flush_pending().await;
        self.highlights.flush_pending_save();
        SECTION_TRANSITIONS_TOTAL
            .with_label_values(&[current.as_str(), trigger])
            .inc();

        let is_last = lock(&self.state)
            .cache
            .get(current)
            .map(SectionPayload::is_last)
            .unwrap_or(false);
        if is_last {
            return Ok(self.finish().await);
        }

        let attempt_id = self.attempt_id();
        let response = self
            .api
            .advance_section(&attempt_id)
            .await
            .context("Failed to advance section")?;

        match response {
            AdvanceResponse::Completed => Ok(self.finish().await),
            AdvanceResponse::Next(name) => {
                let next = SectionType::parse(&name)
                    .ok_or_else(|| RuntimeError::UnknownSection(name.clone()))?;
                self.load_section(next).await?;
                if self.phase() == SessionPhase::InProgress {
                    self.start_section().await;
                }
                tracing::info!("Advanced {} -> {} ({})", current, next, trigger);
                Ok(AdvanceOutcome::Advanced(next))
            }
        }
    }

    async fn finish(&self) -> AdvanceOutcome {
        if self.submit_final().await {
            AdvanceOutcome::Completed
        } else {
            AdvanceOutcome::SubmissionCancelled
        }
    }

    /// Submits the attempt, asking the student whether to retry after every
    /// failure. Returns `false` when they give up.
    pub async fn submit_final(&self) -> bool {
        self.answers.flush_pending().await;
        let attempt_id = self.attempt_id();

        loop {
            let error = match self.api.submit_final(&attempt_id).await {
                Ok(true) => {
                    SUBMISSIONS_TOTAL.with_label_values(&["success"]).inc();
                    self.complete();
                    return true;
                }
                Ok(false) => "The server did not accept the submission".to_string(),
                Err(e) => e.to_string(),
            };

            SUBMISSIONS_TOTAL.with_label_values(&["failed"]).inc();
            tracing::warn!("Final submission failed: attempt={}, error={}", attempt_id, error);
            if !self.prompt.retry_submission(&error).await {
                SUBMISSIONS_TOTAL.with_label_values(&["cancelled"]).inc();
                return false;
            }
        }
    }

    fn complete(&self) {
        let attempt_id = {
            let mut state = lock(&self.state);
            state.phase = SessionPhase::Completed;
            state.attempt.attempt_id.clone()
        };
        self.timer.stop_timer();
        self.guard.set_session_active(false);
        self.guard.teardown();
        self.highlights.cleanup();
        self.highlights.clear_persisted(&attempt_id);
        tracing::info!("Attempt completed: {}", attempt_id);
    }

    pub async fn submit_writing(&self, task_id: &str, text: &str) -> Result<serde_json::Value> {
        self.api
            .submit_writing(&self.attempt_id(), task_id, text)
            .await
            .with_context(|| format!("Failed to submit writing task {}", task_id))
    }

    pub async fn submit_speaking(
        &self,
        question_key: &str,
        audio: Vec<u8>,
    ) -> Result<serde_json::Value> {
        let mut permission = self.guard.permission(PermissionKind::Microphone);
        if !permission.checked {
            permission = self.guard.check_permission(PermissionKind::Microphone).await;
        }
        if !permission.granted {
            return Err(RuntimeError::PermissionDenied(PermissionKind::Microphone).into());
        }
        self.api
            .submit_speaking(&self.attempt_id(), question_key, audio)
            .await
            .with_context(|| format!("Failed to upload speaking answer {}", question_key))
    }

    pub async fn check_permission(&self, kind: PermissionKind) -> PermissionState {
        self.guard.check_permission(kind).await
    }

    pub fn palette(&self) -> Vec<PaletteEntry> {
        let answers = self.answers.answers();
        let state = lock(&self.state);
        state
            .cache
            .get(state.attempt.current_section_type)
            .map(|payload| section_cache::palette(payload, &answers))
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Progress {
        let answers: HashMap<String, AnswerEntry> = self.answers.answers();
        let state = lock(&self.state);
        state
            .cache
            .get(state.attempt.current_section_type)
            .map(|payload| section_cache::progress(payload, &answers))
            .unwrap_or_default()
    }

    /// Saves what is pending and releases every listener and timer.
    pub async fn teardown(&self) {
        self.answers.flush_pending().await;
        self.timer.stop_timer();
        self.guard.teardown();
        self.highlights.cleanup();
    }
}
