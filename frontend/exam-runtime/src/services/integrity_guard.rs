use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::browser::{
    BrowserCapabilities, BrowserEvent, EventBus, EventDisposition, EventKind, ListenerSet,
};
use crate::error::CapabilityError;
use crate::metrics::INTEGRITY_VIOLATIONS_TOTAL;
use crate::models::{IntegrityEvent, PermissionKind, PermissionState, ViolationKind};
use crate::utils::scheduler::lock;

/// `KeyboardEvent.key` values of hardware media keys.
const MEDIA_KEYS: &[&str] = &[
    "MediaPlayPause",
    "MediaPlay",
    "MediaPause",
    "MediaStop",
    "MediaTrackNext",
    "MediaTrackPrevious",
    "MediaFastForward",
    "MediaRewind",
];

pub fn is_media_key(key: &str) -> bool {
    MEDIA_KEYS.contains(&key)
}

type UnloadHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct GuardState {
    mounted: bool,
    session_active: bool,
    warning: bool,
    events: Vec<IntegrityEvent>,
    permissions: HashMap<PermissionKind, PermissionState>,
    listeners: Option<ListenerSet>,
}

struct GuardInner {
    attempt_id: String,
    browser: Arc<dyn BrowserCapabilities>,
    bus: EventBus,
    state: Mutex<GuardState>,
    unload_hook: Mutex<Option<UnloadHook>>,
}

/// Fullscreen, media-key and unload enforcement for one attempt.
#[derive(Clone)]
pub struct IntegrityGuard {
    inner: Arc<GuardInner>,
}

impl IntegrityGuard {
    pub fn new(
        attempt_id: impl Into<String>,
        browser: Arc<dyn BrowserCapabilities>,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                attempt_id: attempt_id.into(),
                browser,
                bus,
                state: Mutex::new(GuardState::default()),
                unload_hook: Mutex::new(None),
            }),
        }
    }

    /// Runs when the page is about to unload during an active session.
    pub fn on_unload<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.inner.unload_hook) = Some(Arc::new(hook));
    }

    /// Registers every listener and blocks Media Session actions. A second
    /// mount is a no-op.
    pub fn mount(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.mounted {
                return;
            }
            state.mounted = true;
        }

        let mut listeners = ListenerSet::new(self.inner.bus.clone());
        for kind in [
            EventKind::FullscreenChange,
            EventKind::KeyDown,
            EventKind::MediaAction,
            EventKind::BeforeUnload,
        ] {
            let weak = Arc::downgrade(&self.inner);
            listeners.add(kind, move |event| match weak.upgrade() {
                Some(inner) => IntegrityGuard { inner }.handle_event(event),
                None => EventDisposition::Continue,
            });
        }

        lock(&self.inner.state).listeners = Some(listeners);

        match self.inner.browser.set_media_session_blocked(true) {
            Ok(()) => {}
            Err(CapabilityError::Unsupported(what)) => {
                tracing::debug!("{} unavailable, media keys rely on key events only", what)
            }
            Err(e) => tracing::warn!("Failed to block media session: {}", e),
        }
        tracing::info!("Integrity guard mounted: attempt={}", self.inner.attempt_id);
    }

    /// Removes every listener in one pass and releases the Media Session.
    pub fn teardown(&self) {
        let listeners = {
            let mut state = lock(&self.inner.state);
            if !state.mounted {
                return;
            }
            state.mounted = false;
            state.warning = false;
            state.listeners.take()
        };
        let removed = listeners.map(|mut l| l.clear()).unwrap_or(0);
        if let Err(e) = self.inner.browser.set_media_session_blocked(false) {
            tracing::debug!("Failed to release media session: {}", e);
        }
        tracing::info!(
            "Integrity guard torn down: attempt={}, listeners_removed={}",
            self.inner.attempt_id,
            removed
        );
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.inner.state).mounted
    }

    /// True once the student is past the instructions step.
    pub fn set_session_active(&self, active: bool) {
        lock(&self.inner.state).session_active = active;
    }

    pub fn session_active(&self) -> bool {
        lock(&self.inner.state).session_active
    }

    /// Requests fullscreen at section start. Failures are advisory.
    pub async fn enter_exam(&self) -> PermissionState {
        let result = self.inner.browser.request_fullscreen().await;
        let permission = match result {
            Ok(()) => PermissionState::granted(),
            Err(CapabilityError::Unsupported(what)) => {
                tracing::debug!("{} unsupported, continuing windowed", what);
                PermissionState::denied(format!("{} is not supported", what))
            }
            Err(e) => {
                tracing::warn!("Fullscreen request refused: {}", e);
                PermissionState::denied(e.to_string())
            }
        };
        lock(&self.inner.state)
            .permissions
            .insert(PermissionKind::Fullscreen, permission.clone());
        permission
    }

    /// Re-requests fullscreen from the warning overlay; clears the warning
    /// once the browser reports fullscreen.
    pub async fn reenter_fullscreen(&self) -> bool {
        if let Err(e) = self.inner.browser.request_fullscreen().await {
            tracing::warn!("Fullscreen re-entry failed: {}", e);
            return false;
        }
        let fullscreen = self.inner.browser.is_fullscreen();
        if fullscreen {
            lock(&self.inner.state).warning = false;
        }
        fullscreen
    }

    pub fn acknowledge_warning(&self) {
        lock(&self.inner.state).warning = false;
    }

    pub fn warning_visible(&self) -> bool {
        lock(&self.inner.state).warning
    }

    pub fn events(&self) -> Vec<IntegrityEvent> {
        lock(&self.inner.state).events.clone()
    }

    pub async fn check_permission(&self, kind: PermissionKind) -> PermissionState {
        let permission = match self.inner.browser.request_permission(kind).await {
            Ok(()) => PermissionState::granted(),
            Err(e) => {
                tracing::warn!("{:?} permission not granted: {}", kind, e);
                PermissionState::denied(e.to_string())
            }
        };
        lock(&self.inner.state)
            .permissions
            .insert(kind, permission.clone());
        permission
    }

    pub fn permission(&self, kind: PermissionKind) -> PermissionState {
        lock(&self.inner.state)
            .permissions
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, kind: ViolationKind, details: Option<String>) {
        INTEGRITY_VIOLATIONS_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::warn!(
            "Integrity violation: attempt={}, kind={}",
            self.inner.attempt_id,
            kind.as_str()
        );
        lock(&self.inner.state)
            .events
            .push(IntegrityEvent::new(&self.inner.attempt_id, kind, details));
    }

    fn handle_event(&self, event: &BrowserEvent) -> EventDisposition {
        let (mounted, active) = {
            let state = lock(&self.inner.state);
            (state.mounted, state.session_active)
        };
        if !mounted {
            return EventDisposition::Continue;
        }

        match event {
            BrowserEvent::FullscreenChange { fullscreen: true } => {
                lock(&self.inner.state).warning = false;
                EventDisposition::Continue
            }
            BrowserEvent::FullscreenChange { fullscreen: false } => {
                if active {
                    lock(&self.inner.state).warning = true;
                    self.record(ViolationKind::FullscreenExit, None);
                }
                EventDisposition::Continue
            }
            BrowserEvent::KeyDown { key } if is_media_key(key) => {
                self.record(ViolationKind::MediaKey, Some(key.clone()));
                EventDisposition::PreventDefault
            }
            BrowserEvent::MediaAction(action) => {
                self.record(ViolationKind::MediaKey, Some(format!("{:?}", action)));
                EventDisposition::PreventDefault
            }
            BrowserEvent::BeforeUnload if active => {
                self.record(ViolationKind::UnloadAttempt, None);
                let hook = lock(&self.inner.unload_hook).clone();
                if let Some(hook) = hook {
                    hook();
                }
                EventDisposition::PreventDefault
            }
            _ => EventDisposition::Continue,
        }
    }
}
