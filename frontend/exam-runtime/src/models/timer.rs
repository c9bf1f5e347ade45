use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SectionType;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub attempt_id: String,
    pub section: SectionType,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u64,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub attempt_id: String,
    pub section: SectionType,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TimerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }

    pub fn is_expiry(&self) -> bool {
        matches!(self, TimerEvent::TimeExpired(_))
    }
}

/// Lifecycle of a section countdown. `Expired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Expired,
}

/// Snapshot handed to the host for display and submission telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerState {
    pub time_remaining_seconds: u32,
    pub elapsed_seconds: u64,
    pub is_running: bool,
    pub phase: TimerPhase,
}
