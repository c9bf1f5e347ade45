//! Section countdown with a parallel elapsed clock.
//!
//! `idle -> running <-> paused`, `running -> expired`. One interval task at
//! most: every start aborts the previous task first. Events go out on an
//! unbounded channel so a slow consumer never stalls the countdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::metrics::TIMER_EXPIRATIONS_TOTAL;
use crate::models::{SectionType, TimeExpired, TimerEvent, TimerPhase, TimerState, TimerTick};
use crate::utils::scheduler::lock;

/// Wall time accumulated between `start` and `pause`.
#[derive(Debug, Clone, Default)]
pub struct ElapsedClock {
    accumulated: Duration,
    started_at: Option<Instant>,
}

impl ElapsedClock {
    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += started.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .started_at
                .map(|started| started.elapsed())
                .unwrap_or_default()
    }
}

struct TimerCore {
    section: SectionType,
    remaining: u32,
    total: u32,
    phase: TimerPhase,
    clock: ElapsedClock,
    task: Option<JoinHandle<()>>,
}

impl TimerCore {
    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct TimerInner {
    attempt_id: String,
    tick: Duration,
    core: Mutex<TimerCore>,
    events: mpsc::UnboundedSender<TimerEvent>,
}

#[derive(Clone)]
pub struct SectionTimer {
    inner: Arc<TimerInner>,
}

impl SectionTimer {
    pub fn new(
        attempt_id: impl Into<String>,
        tick: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let timer = Self {
            inner: Arc::new(TimerInner {
                attempt_id: attempt_id.into(),
                tick,
                core: Mutex::new(TimerCore {
                    section: SectionType::Listening,
                    remaining: 0,
                    total: 0,
                    phase: TimerPhase::Idle,
                    clock: ElapsedClock::default(),
                    task: None,
                }),
                events,
            }),
        };
        (timer, receiver)
    }

    /// Loads a section's countdown. Stops whatever was running.
    pub fn arm(&self, section: SectionType, remaining_seconds: u32) {
        let mut core = lock(&self.inner.core);
        core.abort_task();
        core.section = section;
        core.remaining = remaining_seconds;
        core.total = remaining_seconds;
        core.phase = TimerPhase::Idle;
        core.clock.reset();
        tracing::debug!(
            "Timer armed: attempt={}, section={}, seconds={}",
            self.inner.attempt_id,
            section,
            remaining_seconds
        );
    }

    /// Starts the countdown and the elapsed clock. Calling it again restarts
    /// the interval without a second countdown.
    pub fn start_timer(&self) {
        let mut core = lock(&self.inner.core);
        core.abort_task();
        if core.phase == TimerPhase::Expired {
            return;
        }
        core.clock.start();
        if core.remaining == 0 {
            self.expire(&mut core);
            return;
        }
        core.phase = TimerPhase::Running;

        let timer = self.clone();
        let tick = self.inner.tick;
        core.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            loop {
                interval.tick().await;
                if !timer.on_tick() {
                    break;
                }
            }
        }));
    }

    /// Returns whether the countdown keeps going.
    fn on_tick(&self) -> bool {
        let mut core = lock(&self.inner.core);
        if core.phase != TimerPhase::Running {
            return false;
        }
        core.remaining = core.remaining.saturating_sub(1);
        if core.remaining == 0 {
            core.task = None;
            self.expire(&mut core);
            return false;
        }

        let event = TimerEvent::TimerTick(TimerTick {
            attempt_id: self.inner.attempt_id.clone(),
            section: core.section,
            remaining_seconds: core.remaining,
            elapsed_seconds: core.clock.elapsed().as_secs(),
            total_seconds: core.total,
            timestamp: Utc::now(),
        });
        let _ = self.inner.events.send(event);
        true
    }

    fn expire(&self, core: &mut TimerCore) {
        core.remaining = 0;
        core.phase = TimerPhase::Expired;
        core.clock.pause();
        TIMER_EXPIRATIONS_TOTAL
            .with_label_values(&[core.section.as_str()])
            .inc();
        tracing::info!(
            "Timer expired: attempt={}, section={}",
            self.inner.attempt_id,
            core.section
        );
        let _ = self
            .inner
            .events
            .send(TimerEvent::TimeExpired(TimeExpired {
                attempt_id: self.inner.attempt_id.clone(),
                section: core.section,
                timestamp: Utc::now(),
                message: "Time limit exceeded".to_string(),
            }));
    }

    /// Idempotent. An expired timer stays expired.
    pub fn stop_timer(&self) {
        let mut core = lock(&self.inner.core);
        core.abort_task();
        core.clock.pause();
        if core.phase != TimerPhase::Expired {
            core.phase = TimerPhase::Idle;
        }
    }

    pub fn pause(&self) -> bool {
        let mut core = lock(&self.inner.core);
        if core.phase != TimerPhase::Running {
            return false;
        }
        core.abort_task();
        core.clock.pause();
        core.phase = TimerPhase::Paused;
        true
    }

    pub fn resume(&self) -> bool {
        if self.phase() != TimerPhase::Paused {
            return false;
        }
        self.start_timer();
        true
    }

    /// Server correction of the remaining time. Leaves the elapsed clock
    /// alone.
    pub fn set_remaining(&self, seconds: u32) {
        let mut core = lock(&self.inner.core);
        if core.phase == TimerPhase::Expired {
            return;
        }
        core.remaining = seconds;
        core.total = core.total.max(seconds);
    }

    /// Starts only the elapsed clock.
    pub fn start_elapsed_clock(&self) {
        lock(&self.inner.core).clock.start();
    }

    pub fn phase(&self) -> TimerPhase {
        lock(&self.inner.core).phase
    }

    pub fn section(&self) -> SectionType {
        lock(&self.inner.core).section
    }

    pub fn remaining_seconds(&self) -> u32 {
        lock(&self.inner.core).remaining
    }

    pub fn elapsed_seconds(&self) -> u64 {
        lock(&self.inner.core).clock.elapsed().as_secs()
    }

    pub fn state(&self) -> TimerState {
        let core = lock(&self.inner.core);
        TimerState {
            time_remaining_seconds: core.remaining,
            elapsed_seconds: core.clock.elapsed().as_secs(),
            is_running: core.phase == TimerPhase::Running,
            phase: core.phase,
        }
    }
}
