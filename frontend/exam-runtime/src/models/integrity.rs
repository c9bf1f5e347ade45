use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub attempt_id: String,
    pub kind: ViolationKind,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IntegrityEvent {
    pub fn new(attempt_id: &str, kind: ViolationKind, details: Option<String>) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            kind,
            details,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    FullscreenExit,
    MediaKey,
    UnloadAttempt,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::MediaKey => "media_key",
            ViolationKind::UnloadAttempt => "unload_attempt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Microphone,
    Camera,
    Fullscreen,
}

/// Outcome of asking the browser for a device or display permission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub granted: bool,
    pub checked: bool,
    pub error: Option<String>,
}

impl PermissionState {
    pub fn granted() -> Self {
        Self {
            granted: true,
            checked: true,
            error: None,
        }
    }

    pub fn denied(error: impl Into<String>) -> Self {
        Self {
            granted: false,
            checked: true,
            error: Some(error.into()),
        }
    }
}
