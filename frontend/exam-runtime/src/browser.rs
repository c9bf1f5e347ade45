//! Host capabilities the runtime depends on, and the event bus the host
//! feeds DOM-level events into.
//!
//! A browser binding implements [`BrowserCapabilities`] over the Fullscreen,
//! Media Session and Permissions APIs. [`HeadlessBrowser`] is the in-process
//! implementation used by the runner and the tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dom::{NodeId, Rect};
use crate::error::CapabilityError;
use crate::models::PermissionKind;
use crate::utils::scheduler::lock;

#[async_trait]
pub trait BrowserCapabilities: Send + Sync {
    async fn request_fullscreen(&self) -> Result<(), CapabilityError>;

    fn is_fullscreen(&self) -> bool;

    /// `blocked = true` installs no-op Media Session action handlers,
    /// `false` releases them.
    fn set_media_session_blocked(&self, blocked: bool) -> Result<(), CapabilityError>;

    async fn request_permission(&self, kind: PermissionKind) -> Result<(), CapabilityError>;

    fn viewport(&self) -> Rect;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MouseUp,
    KeyUp,
    KeyDown,
    FullscreenChange,
    BeforeUnload,
    MediaAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    Play,
    Pause,
    Stop,
    SeekBackward,
    SeekForward,
    SeekTo,
    PreviousTrack,
    NextTrack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    MouseUp { target: Option<NodeId> },
    KeyUp { key: String, target: Option<NodeId> },
    KeyDown { key: String },
    FullscreenChange { fullscreen: bool },
    BeforeUnload,
    MediaAction(MediaAction),
}

impl BrowserEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BrowserEvent::MouseUp { .. } => EventKind::MouseUp,
            BrowserEvent::KeyUp { .. } => EventKind::KeyUp,
            BrowserEvent::KeyDown { .. } => EventKind::KeyDown,
            BrowserEvent::FullscreenChange { .. } => EventKind::FullscreenChange,
            BrowserEvent::BeforeUnload => EventKind::BeforeUnload,
            BrowserEvent::MediaAction(_) => EventKind::MediaAction,
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        match self {
            BrowserEvent::MouseUp { target } | BrowserEvent::KeyUp { target, .. } => *target,
            _ => None,
        }
    }
}

/// What the host should do with an event after dispatch. `PreventDefault`
/// on `BeforeUnload` means "show the leave-page warning".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Continue,
    PreventDefault,
}

impl EventDisposition {
    fn merge(self, other: EventDisposition) -> EventDisposition {
        if self == EventDisposition::PreventDefault || other == EventDisposition::PreventDefault {
            EventDisposition::PreventDefault
        } else {
            EventDisposition::Continue
        }
    }
}

pub type Listener = Arc<dyn Fn(&BrowserEvent) -> EventDisposition + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<(ListenerId, EventKind, Listener)>,
}

/// Listener registry shared by the host and every runtime component.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&BrowserEvent) -> EventDisposition + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, kind, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _, _)| *existing != id);
        inner.listeners.len() != before
    }

    fn remove_many(&self, ids: &[ListenerId]) -> usize {
        let mut inner = lock(&self.inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _, _)| !ids.contains(existing));
        before - inner.listeners.len()
    }

    /// Runs every listener registered for the event's kind. Listeners are
    /// called outside the registry lock, so they may register or remove
    /// listeners themselves.
    pub fn dispatch(&self, event: &BrowserEvent) -> EventDisposition {
        let kind = event.kind();
        let listeners: Vec<Listener> = lock(&self.inner)
            .listeners
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| l.clone())
            .collect();

        listeners
            .iter()
            .fold(EventDisposition::Continue, |acc, listener| {
                acc.merge(listener(event))
            })
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn listener_count_for(&self, kind: EventKind) -> usize {
        lock(&self.inner)
            .listeners
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

/// The listeners one component registered, removable in a single pass.
pub struct ListenerSet {
    bus: EventBus,
    ids: Vec<ListenerId>,
}

impl ListenerSet {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            ids: Vec::new(),
        }
    }

    pub fn add<F>(&mut self, kind: EventKind, listener: F)
    where
        F: Fn(&BrowserEvent) -> EventDisposition + Send + Sync + 'static,
    {
        let id = self.bus.add_listener(kind, listener);
        self.ids.push(id);
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.bus.remove_many(&self.ids);
        self.ids.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug)]
struct HeadlessState {
    fullscreen: bool,
    fullscreen_supported: bool,
    media_blocked: bool,
    denied: HashSet<PermissionKind>,
    viewport: Rect,
}

/// Capabilities backed by plain state. Fullscreen requests succeed unless
/// disabled; permissions are granted unless explicitly denied.
#[derive(Debug)]
pub struct HeadlessBrowser {
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBrowser {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState {
                fullscreen: false,
                fullscreen_supported: true,
                media_blocked: false,
                denied: HashSet::new(),
                viewport: Rect::new(0.0, 0.0, 1280.0, 800.0),
            }),
        }
    }

    pub fn deny(self, kind: PermissionKind) -> Self {
        lock(&self.state).denied.insert(kind);
        self
    }

    pub fn without_fullscreen(self) -> Self {
        lock(&self.state).fullscreen_supported = false;
        self
    }

    /// Simulates the user leaving or entering fullscreen. The caller still
    /// dispatches the matching `FullscreenChange` event.
    pub fn set_fullscreen(&self, fullscreen: bool) {
        lock(&self.state).fullscreen = fullscreen;
    }

    pub fn media_session_blocked(&self) -> bool {
        lock(&self.state).media_blocked
    }

    pub fn set_viewport(&self, viewport: Rect) {
        lock(&self.state).viewport = viewport;
    }
}

#[async_trait]
impl BrowserCapabilities for HeadlessBrowser {
    async fn request_fullscreen(&self) -> Result<(), CapabilityError> {
        let mut state = lock(&self.state);
        if !state.fullscreen_supported {
            return Err(CapabilityError::Unsupported("fullscreen"));
        }
        state.fullscreen = true;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        lock(&self.state).fullscreen
    }

    fn set_media_session_blocked(&self, blocked: bool) -> Result<(), CapabilityError> {
        lock(&self.state).media_blocked = blocked;
        Ok(())
    }

    async fn request_permission(&self, kind: PermissionKind) -> Result<(), CapabilityError> {
        if lock(&self.state).denied.contains(&kind) {
            return Err(CapabilityError::Denied(format!(
                "{:?} access was denied by the user",
                kind
            )));
        }
        Ok(())
    }

    fn viewport(&self) -> Rect {
        lock(&self.state).viewport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.add_listener(EventKind::MouseUp, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            EventDisposition::Continue
        });

        bus.dispatch(&BrowserEvent::MouseUp { target: None });
        bus.dispatch(&BrowserEvent::BeforeUnload);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn any_prevent_default_wins() {
        let bus = EventBus::new();
        bus.add_listener(EventKind::BeforeUnload, |_| EventDisposition::Continue);
        bus.add_listener(EventKind::BeforeUnload, |_| EventDisposition::PreventDefault);

        assert_eq!(
            bus.dispatch(&BrowserEvent::BeforeUnload),
            EventDisposition::PreventDefault
        );
    }

    #[test]
    fn listener_set_clears_in_one_pass() {
        let bus = EventBus::new();
        let mut set = ListenerSet::new(bus.clone());
        set.add(EventKind::KeyDown, |_| EventDisposition::Continue);
        set.add(EventKind::BeforeUnload, |_| EventDisposition::Continue);
        bus.add_listener(EventKind::MouseUp, |_| EventDisposition::Continue);

        assert_eq!(set.clear(), 2);
        assert!(set.is_empty());
        assert_eq!(bus.listener_count(), 1);
        assert_eq!(set.clear(), 0);
    }

    #[tokio::test]
    async fn headless_denies_configured_permissions() {
        let browser = HeadlessBrowser::new().deny(PermissionKind::Microphone);
        assert!(browser
            .request_permission(PermissionKind::Microphone)
            .await
            .is_err());
        assert!(browser
            .request_permission(PermissionKind::Camera)
            .await
            .is_ok());
    }
}
