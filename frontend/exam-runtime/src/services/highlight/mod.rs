//! In-passage text highlighting.
//!
//! One engine per attempt. Marks are `<mark>` elements carrying the colour,
//! formats, section and attempt as data attributes; the persisted form is the
//! list of marked texts per `(attempt_id, section_name)`. No operation here
//! returns an error to the caller: document failures are logged, counted and
//! skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::browser::{
    BrowserCapabilities, BrowserEvent, EventBus, EventDisposition, EventKind, ListenerSet,
};
use crate::config::RuntimeSettings;
use crate::dom::{Document, DomResult, NodeId, Range, Rect, SharedDocument};
use crate::error::DomError;
use crate::metrics::{HIGHLIGHT_OPERATIONS_TOTAL, HIGHLIGHT_RESTORE_TOTAL};
use crate::models::highlight::FORMAT_ONLY;
use crate::models::{Highlight, HighlightColor, TextFormat};
use crate::utils::scheduler::{lock, KeyedScheduler};

pub mod locate;
pub mod store;

pub use locate::{locate_first, Segment, Span};
pub use store::{
    FileStore, HighlightMap, HighlightRepository, KeyValueStore, MemoryStore, HIGHLIGHTS_KEY,
};

pub const MARK_TAG: &str = "mark";
pub const ATTR_COLOR: &str = "data-highlight-color";
pub const ATTR_SECTION: &str = "data-section";
pub const ATTR_ATTEMPT: &str = "data-attempt";
pub const ATTR_FORMATS: &str = "data-formats";
const ATTR_TIMESTAMP: &str = "data-timestamp";
const MARK_CLASS: &str = "exam-highlight";

pub const PICKER_WIDTH: f64 = 184.0;
pub const PICKER_HEIGHT: f64 = 40.0;
const PICKER_GAP: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightContext {
    pub section_name: String,
    pub container: NodeId,
    pub attempt_id: String,
}

/// Floating colour picker, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PickerState {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub already_present: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Centred above the selection, flipped below when it would leave the top
/// of the viewport, clamped horizontally.
pub fn picker_position(selection: Rect, viewport: Rect) -> (f64, f64) {
    let min_x = viewport.x + PICKER_GAP;
    let max_x = (viewport.right() - PICKER_WIDTH - PICKER_GAP).max(min_x);
    let x = (selection.x + selection.width / 2.0 - PICKER_WIDTH / 2.0).clamp(min_x, max_x);

    let above = selection.y - PICKER_HEIGHT - PICKER_GAP;
    let y = if above >= viewport.y + PICKER_GAP {
        above
    } else {
        let below = selection.bottom() + PICKER_GAP;
        let max_y = (viewport.bottom() - PICKER_HEIGHT - PICKER_GAP).max(viewport.y);
        below.min(max_y)
    };
    (x, y)
}

#[derive(Default)]
struct EngineState {
    context: Option<HighlightContext>,
    loaded: Vec<Highlight>,
    picker: PickerState,
    listeners: Option<ListenerSet>,
    restore_task: Option<JoinHandle<RestoreReport>>,
    generation: u64,
}

struct EngineInner {
    document: SharedDocument,
    repository: HighlightRepository,
    bus: EventBus,
    browser: Arc<dyn BrowserCapabilities>,
    settings: RuntimeSettings,
    selection_debounce: KeyedScheduler<()>,
    save_throttle: KeyedScheduler<()>,
    state: Mutex<EngineState>,
}

#[derive(Clone)]
pub struct HighlightEngine {
    inner: Arc<EngineInner>,
}

impl HighlightEngine {
    pub fn new(
        document: SharedDocument,
        repository: HighlightRepository,
        bus: EventBus,
        browser: Arc<dyn BrowserCapabilities>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                document,
                repository,
                bus,
                browser,
                settings,
                selection_debounce: KeyedScheduler::new("highlight-selection"),
                save_throttle: KeyedScheduler::new("highlight-save"),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    pub fn repository(&self) -> &HighlightRepository {
        &self.inner.repository
    }

    pub fn context(&self) -> Option<HighlightContext> {
        lock(&self.inner.state).context.clone()
    }

    pub fn picker(&self) -> PickerState {
        lock(&self.inner.state).picker
    }

    fn generation(&self) -> u64 {
        lock(&self.inner.state).generation
    }

    /// Binds the engine to a section container and schedules restoration of
    /// the attempt's persisted highlights. Any previous binding is cleaned
    /// up first.
    pub fn init(&self, section_name: &str, container: NodeId, attempt_id: &str) {
        self.cleanup();

        let loaded = self.inner.repository.load(attempt_id, section_name);
        let mut listeners = ListenerSet::new(self.inner.bus.clone());
        for kind in [EventKind::MouseUp, EventKind::KeyUp] {
            let weak = Arc::downgrade(&self.inner);
            listeners.add(kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    HighlightEngine { inner }.handle_selection_event(event);
                }
                EventDisposition::Continue
            });
        }

        let generation = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.context = Some(HighlightContext {
                section_name: section_name.to_string(),
                container,
                attempt_id: attempt_id.to_string(),
            });
            state.listeners = Some(listeners);
            state.loaded = loaded;
            state.generation
        };

        tracing::info!(
            "Highlight engine ready: attempt={}, section={}, persisted={}",
            attempt_id,
            section_name,
            lock(&self.inner.state).loaded.len()
        );

        let engine = self.clone();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            engine.restore(generation).await
        });
        lock(&self.inner.state).restore_task = Some(task);
    }

    /// Waits for the restoration scheduled by the last `init`.
    pub async fn wait_restored(&self) -> RestoreReport {
        let task = lock(&self.inner.state).restore_task.take();
        match task {
            Some(task) => task.await.unwrap_or_default(),
            None => RestoreReport::default(),
        }
    }

    /// Unbinds listeners, hides the picker and drops cached state. A pending
    /// throttled save is written first. Safe to call at any time.
    pub fn cleanup(&self) {
        self.inner.selection_debounce.cancel_all();
        self.flush_pending_save();

        let (listeners, task) = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.context = None;
            state.loaded.clear();
            state.picker = PickerState::default();
            (state.listeners.take(), state.restore_task.take())
        };
        if let Some(mut listeners) = listeners {
            listeners.clear();
        }
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Drops the attempt's persisted highlights from the local store.
    pub fn clear_persisted(&self, attempt_id: &str) {
        if let Err(e) = self.inner.repository.clear_attempt(attempt_id) {
            tracing::warn!("Failed to clear highlights for attempt {}: {}", attempt_id, e);
        }
    }

    fn handle_selection_event(&self, event: &BrowserEvent) {
        let Some(ctx) = self.context() else {
            return;
        };
        if let Some(target) = event.target() {
            let doc = lock(&self.inner.document);
            if !doc.contains(ctx.container, target) {
                return;
            }
        }
        self.on_selection_change();
    }

    /// Debounced re-evaluation of the picker.
    pub fn on_selection_change(&self) {
        let engine = self.clone();
        self.inner.selection_debounce.schedule(
            (),
            self.inner.settings.selection_debounce(),
            async move {
                engine.evaluate_selection();
            },
        );
    }

    /// Shows the picker for a non-empty selection inside the container,
    /// hides it otherwise.
    pub fn evaluate_selection(&self) -> PickerState {
        let viewport = self.inner.browser.viewport();
        let next = match self.context() {
            Some(ctx) => {
                let doc = lock(&self.inner.document);
                match doc.selection() {
                    Some(selection) if !selection.range.is_collapsed() => {
                        let inside = selection
                            .range
                            .common_ancestor(&doc)
                            .map(|ancestor| doc.contains(ctx.container, ancestor))
                            .unwrap_or(false);
                        if inside && !selection.range.to_text(&doc).trim().is_empty() {
                            let (x, y) = picker_position(selection.rect, viewport);
                            PickerState {
                                visible: true,
                                x,
                                y,
                            }
                        } else {
                            PickerState::default()
                        }
                    }
                    _ => PickerState::default(),
                }
            }
            None => PickerState::default(),
        };
        lock(&self.inner.state).picker = next;
        next
    }

    fn hide_picker(&self) {
        lock(&self.inner.state).picker = PickerState::default();
    }

    /// Highlights the current selection, or recolours the mark it sits in.
    pub fn apply_highlight(&self, color_index: i32) -> bool {
        let Some(ctx) = self.context() else {
            tracing::debug!("apply_highlight called before init");
            return false;
        };
        if HighlightColor::from_index(color_index).is_none() {
            tracing::warn!("Ignoring unknown highlight colour {}", color_index);
            return false;
        }

        let result = {
            let mut doc = lock(&self.inner.document);
            let Some(selection) = doc.selection().copied() else {
                return false;
            };
            let range = selection.range;
            if let Some(mark) = mark_under_range(&doc, &ctx, &range) {
                let formats = mark_formats(&doc, mark);
                let result = write_mark_style(&mut doc, mark, color_index, &formats)
                    .map(|_| ("recolor", None));
                doc.clear_selection();
                result
            } else if range.is_collapsed() {
                return false;
            } else {
                let highlight = Highlight::new(range.to_text(&doc), color_index, Vec::new());
                let result = wrap_range(&mut doc, &ctx, &range, &highlight)
                    .map(|(path, single)| (path, single.then_some(highlight)));
                if result.is_ok() {
                    doc.clear_selection();
                }
                result
            }
        };

        self.finish_operation("apply", result)
    }

    /// Toggles a text format on the mark under the selection, or creates a
    /// format-only mark.
    pub fn apply_format(&self, format_index: u8) -> bool {
        let Some(ctx) = self.context() else {
            tracing::debug!("apply_format called before init");
            return false;
        };
        if TextFormat::from_index(format_index).is_none() {
            tracing::warn!("Ignoring unknown text format {}", format_index);
            return false;
        }

        let result = {
            let mut doc = lock(&self.inner.document);
            let Some(selection) = doc.selection().copied() else {
                return false;
            };
            let range = selection.range;
            if let Some(mark) = mark_under_range(&doc, &ctx, &range) {
                let mut formats = mark_formats(&doc, mark);
                if let Some(pos) = formats.iter().position(|f| *f == format_index) {
                    formats.remove(pos);
                } else {
                    formats.push(format_index);
                    formats.sort_unstable();
                }
                let color = mark_color(&doc, mark);
                let result = if color == FORMAT_ONLY && formats.is_empty() {
                    doc.unwrap(mark).map(|_| ("unformat", None))
                } else {
                    write_mark_style(&mut doc, mark, color, &formats).map(|_| ("toggle", None))
                };
                doc.clear_selection();
                result
            } else if range.is_collapsed() {
                return false;
            } else {
                let highlight =
                    Highlight::new(range.to_text(&doc), FORMAT_ONLY, vec![format_index]);
                let result = wrap_range(&mut doc, &ctx, &range, &highlight)
                    .map(|(path, single)| (path, single.then_some(highlight)));
                if result.is_ok() {
                    doc.clear_selection();
                }
                result
            }
        };

        self.finish_operation("format", result)
    }

    fn finish_operation(
        &self,
        operation: &str,
        result: DomResult<(&'static str, Option<Highlight>)>,
    ) -> bool {
        self.hide_picker();
        match result {
            Ok((path, created)) => {
                HIGHLIGHT_OPERATIONS_TOTAL
                    .with_label_values(&[operation, path])
                    .inc();
                match created {
                    Some(highlight) => self.save_highlight(highlight),
                    None => self.save_all_highlights(),
                }
                true
            }
            Err(e) => {
                HIGHLIGHT_OPERATIONS_TOTAL
                    .with_label_values(&[operation, "error"])
                    .inc();
                tracing::warn!("Highlight {} failed: {}", operation, e);
                false
            }
        }
    }

    /// Unwraps every mark the selection touches. Returns how many were
    /// removed.
    pub fn remove_highlight(&self) -> usize {
        let Some(ctx) = self.context() else {
            return 0;
        };

        let removed = {
            let mut doc = lock(&self.inner.document);
            let Some(selection) = doc.selection().copied() else {
                return 0;
            };
            let range = selection.range;

            let mut marks: Vec<NodeId> = Vec::new();
            let mut touched = vec![range.start.node, range.end.node];
            if let Ok(slices) = range.text_slices(&doc) {
                touched.extend(slices.into_iter().map(|(node, _, _)| node));
            }
            for node in touched {
                if let Some(mark) = enclosing_mark(&doc, &ctx, node) {
                    if !marks.contains(&mark) {
                        marks.push(mark);
                    }
                }
            }

            let mut removed = 0;
            for mark in marks {
                match doc.unwrap(mark) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to unwrap highlight {:?}: {}", mark, e),
                }
            }
            doc.clear_selection();
            removed
        };

        self.hide_picker();
        if removed > 0 {
            HIGHLIGHT_OPERATIONS_TOTAL
                .with_label_values(&["remove", "unwrap"])
                .inc();
            self.save_all_highlights();
        }
        removed
    }

    /// Appends one record for the bound section.
    pub fn save_highlight(&self, highlight: Highlight) {
        let Some(ctx) = self.context() else {
            return;
        };
        if let Err(e) =
            self.inner
                .repository
                .append(&ctx.attempt_id, &ctx.section_name, highlight)
        {
            tracing::warn!("Failed to persist highlight: {}", e);
        }
    }

    /// Rescans the live marks and replaces the stored list. Calls inside the
    /// throttle window coalesce into one write.
    pub fn save_all_highlights(&self) {
        let engine = self.clone();
        let accepted = self.inner.save_throttle.schedule_once(
            (),
            self.inner.settings.highlight_save_throttle(),
            async move {
                engine.write_snapshot();
            },
        );
        if !accepted {
            tracing::debug!("Highlight save already pending, coalescing");
        }
    }

    /// Writes a pending throttled save immediately. Returns whether one was
    /// pending.
    pub fn flush_pending_save(&self) -> bool {
        if self.inner.save_throttle.cancel(&()) {
            self.write_snapshot();
            true
        } else {
            false
        }
    }

    fn write_snapshot(&self) {
        let Some(ctx) = self.context() else {
            return;
        };
        let highlights = {
            let doc = lock(&self.inner.document);
            collect_marks(&doc, &ctx)
        };
        let count = highlights.len();
        match self
            .inner
            .repository
            .replace(&ctx.attempt_id, &ctx.section_name, highlights)
        {
            Ok(()) => tracing::debug!(
                "Saved {} highlights for {}/{}",
                count,
                ctx.attempt_id,
                ctx.section_name
            ),
            Err(e) => tracing::warn!("Failed to save highlights: {}", e),
        }
    }

    /// Marks of the bound section currently in the document.
    pub fn live_highlights(&self) -> Vec<Highlight> {
        let Some(ctx) = self.context() else {
            return Vec::new();
        };
        let doc = lock(&self.inner.document);
        collect_marks(&doc, &ctx)
    }

    async fn restore(&self, generation: u64) -> RestoreReport {
        let mut report = RestoreReport::default();
        let (ctx, loaded) = {
            let state = lock(&self.inner.state);
            match &state.context {
                Some(ctx) if state.generation == generation => (ctx.clone(), state.loaded.clone()),
                _ => return report,
            }
        };
        if loaded.is_empty() {
            return report;
        }

        // Texts already marked count against their persisted records, so a
        // second restore over the same container adds nothing.
        let mut present: HashMap<String, usize> = HashMap::new();
        {
            let doc = lock(&self.inner.document);
            for highlight in collect_marks(&doc, &ctx) {
                *present.entry(highlight.text).or_default() += 1;
            }
        }

        let batch_size = self.inner.settings.restore_batch_size.max(1);
        for (index, batch) in loaded.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }
            if self.generation() != generation {
                tracing::debug!("Highlight restore superseded by a newer init");
                return report;
            }

            let mut doc = lock(&self.inner.document);
            for highlight in batch {
                if let Some(count) = present.get_mut(&highlight.text).filter(|c| **c > 0) {
                    *count -= 1;
                    report.already_present += 1;
                    HIGHLIGHT_RESTORE_TOTAL.with_label_values(&["present"]).inc();
                    continue;
                }
                match restore_one(&mut doc, &ctx, highlight) {
                    Ok(true) => {
                        report.restored += 1;
                        HIGHLIGHT_RESTORE_TOTAL.with_label_values(&["restored"]).inc();
                    }
                    Ok(false) => {
                        report.missing += 1;
                        HIGHLIGHT_RESTORE_TOTAL.with_label_values(&["missing"]).inc();
                        tracing::debug!("Highlight text not found: {:?}", highlight.text);
                    }
                    Err(e) => {
                        report.failed += 1;
                        HIGHLIGHT_RESTORE_TOTAL.with_label_values(&["error"]).inc();
                        tracing::warn!("Failed to restore highlight {:?}: {}", highlight.text, e);
                    }
                }
            }
        }

        tracing::info!(
            "Restored highlights for {}/{}: {:?}",
            ctx.attempt_id,
            ctx.section_name,
            report
        );
        report
    }
}

fn is_attempt_mark(doc: &Document, node: NodeId, attempt_id: &str) -> bool {
    doc.tag(node) == Some(MARK_TAG) && doc.attribute(node, ATTR_ATTEMPT) == Some(attempt_id)
}

fn enclosing_mark(doc: &Document, ctx: &HighlightContext, node: NodeId) -> Option<NodeId> {
    doc.closest(node, |d, n| is_attempt_mark(d, n, &ctx.attempt_id))
        .filter(|mark| doc.contains(ctx.container, *mark))
}

/// The mark containing both ends of the range, if there is one.
fn mark_under_range(doc: &Document, ctx: &HighlightContext, range: &Range) -> Option<NodeId> {
    let start = enclosing_mark(doc, ctx, range.start.node)?;
    let end = enclosing_mark(doc, ctx, range.end.node)?;
    (start == end).then_some(start)
}

fn mark_color(doc: &Document, mark: NodeId) -> i32 {
    doc.attribute(mark, ATTR_COLOR)
        .and_then(|v| v.parse().ok())
        .unwrap_or(FORMAT_ONLY)
}

fn mark_formats(doc: &Document, mark: NodeId) -> Vec<u8> {
    doc.attribute(mark, ATTR_FORMATS)
        .map(|v| v.split(',').filter_map(|f| f.trim().parse().ok()).collect())
        .unwrap_or_default()
}

fn mark_class(color: i32, formats: &[u8]) -> String {
    let mut class = MARK_CLASS.to_string();
    if let Some(color) = HighlightColor::from_index(color) {
        class.push_str(&format!(" hl-color-{}", color.index()));
    }
    for format in formats.iter().filter_map(|f| TextFormat::from_index(*f)) {
        class.push(' ');
        class.push_str(format.css_class());
    }
    class
}

fn write_mark_style(doc: &mut Document, mark: NodeId, color: i32, formats: &[u8]) -> DomResult<()> {
    doc.set_attribute(mark, ATTR_COLOR, &color.to_string())?;
    if formats.is_empty() {
        doc.remove_attribute(mark, ATTR_FORMATS)?;
    } else {
        let joined: Vec<String> = formats.iter().map(u8::to_string).collect();
        doc.set_attribute(mark, ATTR_FORMATS, &joined.join(","))?;
    }
    match HighlightColor::from_index(color) {
        Some(color) => {
            doc.set_attribute(mark, "style", &format!("background-color: {}", color.hex()))?
        }
        None => doc.remove_attribute(mark, "style")?,
    }
    doc.set_attribute(mark, "class", &mark_class(color, formats))
}

fn create_mark(
    doc: &mut Document,
    ctx: &HighlightContext,
    highlight: &Highlight,
) -> DomResult<NodeId> {
    let mark = doc.create_element(MARK_TAG);
    doc.set_attribute(mark, ATTR_SECTION, &ctx.section_name)?;
    doc.set_attribute(mark, ATTR_ATTEMPT, &ctx.attempt_id)?;
    doc.set_attribute(mark, ATTR_TIMESTAMP, &highlight.timestamp.to_string())?;
    write_mark_style(doc, mark, highlight.color, &highlight.formats)?;
    Ok(mark)
}

/// Wraps the range in one mark when it lies in a single text node, else
/// wraps each unmarked text piece it touches. Returns the path taken and
/// whether exactly one mark was created.
fn wrap_range(
    doc: &mut Document,
    ctx: &HighlightContext,
    range: &Range,
    highlight: &Highlight,
) -> DomResult<(&'static str, bool)> {
    let simple_error = if range.start.node == range.end.node {
        let mark = create_mark(doc, ctx, highlight)?;
        match doc.surround_contents(range, mark) {
            Ok(()) => return Ok(("simple", true)),
            Err(e) => {
                doc.remove(mark)?;
                e
            }
        }
    } else {
        DomError::PartiallySelected
    };
    tracing::debug!("Simple wrap failed ({}), wrapping text nodes", simple_error);

    let slices = range.text_slices(doc)?;
    let mut wrapped = 0;
    for (node, start, end) in slices {
        if !doc.contains(ctx.container, node) || enclosing_mark(doc, ctx, node).is_some() {
            continue;
        }
        let mark = create_mark(doc, ctx, highlight)?;
        match doc.wrap_text_slice(node, start, end, mark) {
            Ok(()) => wrapped += 1,
            Err(e) => {
                doc.remove(mark)?;
                tracing::warn!("Skipping text node {:?}: {}", node, e);
            }
        }
    }

    if wrapped == 0 {
        return Err(simple_error);
    }
    Ok(("multi_node", false))
}

fn collect_marks(doc: &Document, ctx: &HighlightContext) -> Vec<Highlight> {
    doc.elements_by_tag(ctx.container, MARK_TAG)
        .into_iter()
        .filter(|mark| {
            is_attempt_mark(doc, *mark, &ctx.attempt_id)
                && doc.attribute(*mark, ATTR_SECTION) == Some(ctx.section_name.as_str())
        })
        .filter_map(|mark| {
            let text = doc.text_content(mark);
            if text.is_empty() {
                return None;
            }
            let timestamp = doc
                .attribute(mark, ATTR_TIMESTAMP)
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Utc::now().timestamp_millis());
            Some(Highlight {
                text,
                color: mark_color(doc, mark),
                formats: mark_formats(doc, mark),
                timestamp,
            })
        })
        .collect()
}

fn restore_one(doc: &mut Document, ctx: &HighlightContext, highlight: &Highlight) -> DomResult<bool> {
    let nodes = doc.text_nodes(ctx.container);
    let spans = {
        let view: &Document = doc;
        let segments: Vec<Segment<'_, NodeId>> = nodes
            .iter()
            .map(|node| Segment {
                id: *node,
                text: view.text(*node).unwrap_or_default(),
                marked: enclosing_mark(view, ctx, *node).is_some(),
            })
            .collect();
        locate_first(&segments, &highlight.text)
    };
    let Some(spans) = spans else {
        return Ok(false);
    };

    for span in spans {
        let mark = create_mark(doc, ctx, highlight)?;
        if let Err(e) = doc.wrap_text_slice(span.id, span.start, span.end, mark) {
            doc.remove(mark)?;
            return Err(e);
        }
    }
    Ok(true)
}
