mod common;

use std::sync::Arc;
use std::time::Duration;

use common::settle;
use ielts_exam_runtime::browser::{BrowserEvent, EventBus, HeadlessBrowser};
use ielts_exam_runtime::config::RuntimeSettings;
use ielts_exam_runtime::dom::{Boundary, Document, NodeId, Range, Rect, Selection, SharedDocument};
use ielts_exam_runtime::services::highlight::{
    HighlightEngine, HighlightRepository, KeyValueStore, MemoryStore, ATTR_COLOR, HIGHLIGHTS_KEY,
    MARK_TAG, PICKER_WIDTH,
};

const PASSAGE: &str = r#"<div id="passage"><p>The blue whale is the largest animal.</p><p>A whale song carries far.</p></div>"#;

struct Fixture {
    engine: HighlightEngine,
    doc: SharedDocument,
    container: NodeId,
    bus: EventBus,
    browser: Arc<HeadlessBrowser>,
}

fn mount(markup: &str, store: &Arc<MemoryStore>) -> Fixture {
    common::init_tracing();
    let doc = Document::from_html(markup);
    let container = doc
        .find_by_attribute(doc.root(), "id", "passage")
        .expect("passage container");
    let doc = doc.into_shared();
    let bus = EventBus::new();
    let browser = Arc::new(HeadlessBrowser::new());
    let engine = HighlightEngine::new(
        doc.clone(),
        HighlightRepository::new(store.clone()),
        bus.clone(),
        browser.clone(),
        RuntimeSettings::default(),
    );
    engine.init("reading", container, "attempt-42");
    Fixture {
        engine,
        doc,
        container,
        bus,
        browser,
    }
}

fn select(doc: &SharedDocument, start: (usize, usize), end: (usize, usize)) {
    let mut doc = doc.lock().unwrap();
    let texts = doc.text_nodes(doc.root());
    doc.set_selection(Some(Selection {
        range: Range::new(
            Boundary::new(texts[start.0], start.1),
            Boundary::new(texts[end.0], end.1),
        ),
        rect: Rect::new(300.0, 240.0, 60.0, 18.0),
    }));
}

fn marks(fixture: &Fixture) -> Vec<(String, Option<String>)> {
    let doc = fixture.doc.lock().unwrap();
    doc.elements_by_tag(fixture.container, MARK_TAG)
        .into_iter()
        .map(|mark| {
            (
                doc.text_content(mark),
                doc.attribute(mark, ATTR_COLOR).map(str::to_string),
            )
        })
        .collect()
}

fn stored_count(store: &Arc<MemoryStore>) -> usize {
    HighlightRepository::new(store.clone()).count("attempt-42", "reading")
}

#[tokio::test]
async fn highlight_survives_reload() {
    let store = Arc::new(MemoryStore::new());
    let first = mount(PASSAGE, &store);
    first.engine.wait_restored().await;

    select(&first.doc, (0, 9), (0, 14));
    assert!(first.engine.apply_highlight(0));

    assert_eq!(marks(&first), vec![("whale".to_string(), Some("0".to_string()))]);
    let stored = HighlightRepository::new(store.clone()).load("attempt-42", "reading");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "whale");
    assert_eq!(stored[0].color, 0);
    assert!(store.get(HIGHLIGHTS_KEY).unwrap().is_some());

    let reloaded = mount(PASSAGE, &store);
    let report = reloaded.engine.wait_restored().await;

    assert_eq!(report.restored, 1);
    assert_eq!(report.missing, 0);
    assert_eq!(marks(&reloaded), vec![("whale".to_string(), Some("0".to_string()))]);
    let doc = reloaded.doc.lock().unwrap();
    assert_eq!(
        doc.text_content(reloaded.container),
        "The blue whale is the largest animal.A whale song carries far."
    );
}

#[tokio::test]
async fn selection_across_elements_marks_each_text_piece() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(
        r#"<div id="passage"><p>The <b>blue</b> whale</p></div>"#,
        &store,
    );
    fixture.engine.wait_restored().await;

    select(&fixture.doc, (0, 0), (2, 6));
    assert!(fixture.engine.apply_highlight(1));

    let texts: Vec<String> = marks(&fixture).into_iter().map(|(text, _)| text).collect();
    assert_eq!(texts, vec!["The ", "blue", " whale"]);
    assert!(fixture.engine.flush_pending_save());
    assert_eq!(stored_count(&store), 3);

    let reloaded = mount(r#"<div id="passage"><p>The <b>blue</b> whale</p></div>"#, &store);
    let report = reloaded.engine.wait_restored().await;
    assert_eq!(report.restored, 3);
    assert_eq!(marks(&reloaded).len(), 3);
}

#[tokio::test]
async fn removing_last_highlight_leaves_no_records() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;

    select(&fixture.doc, (0, 4), (0, 8));
    assert!(fixture.engine.apply_highlight(3));
    assert_eq!(stored_count(&store), 1);

    {
        let mut doc = fixture.doc.lock().unwrap();
        let mark = doc.elements_by_tag(fixture.container, MARK_TAG)[0];
        let text = doc.children(mark)[0];
        doc.select_text(text, 0, 2, Rect::default()).unwrap();
    }
    assert_eq!(fixture.engine.remove_highlight(), 1);
    assert!(fixture.engine.flush_pending_save());

    assert!(marks(&fixture).is_empty());
    assert_eq!(stored_count(&store), 0);
    assert!(store.get(HIGHLIGHTS_KEY).unwrap().is_none());
    let doc = fixture.doc.lock().unwrap();
    assert_eq!(doc.text_nodes(fixture.container).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn saves_inside_throttle_window_coalesce() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;

    select(&fixture.doc, (0, 9), (0, 14));
    assert!(fixture.engine.apply_highlight(0));
    select(&fixture.doc, (3, 2), (3, 7));
    assert!(fixture.engine.apply_highlight(1));
    assert_eq!(stored_count(&store), 2);

    for _ in 0..2 {
        let mut doc = fixture.doc.lock().unwrap();
        let mark = doc.elements_by_tag(fixture.container, MARK_TAG)[0];
        let text = doc.children(mark)[0];
        doc.select_text(text, 0, 1, Rect::default()).unwrap();
        drop(doc);
        assert_eq!(fixture.engine.remove_highlight(), 1);
        settle().await;
    }
    assert_eq!(stored_count(&store), 2);

    tokio::time::advance(Duration::from_millis(300)).await;
    settle().await;
    assert_eq!(stored_count(&store), 0);
    assert!(!fixture.engine.flush_pending_save());
}

#[tokio::test]
async fn restoring_twice_adds_nothing() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;

    select(&fixture.doc, (0, 9), (0, 14));
    assert!(fixture.engine.apply_highlight(2));

    fixture
        .engine
        .init("reading", fixture.container, "attempt-42");
    let report = fixture.engine.wait_restored().await;

    assert_eq!(report.restored, 0);
    assert_eq!(report.already_present, 1);
    assert_eq!(marks(&fixture).len(), 1);
}

#[tokio::test]
async fn missing_text_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;
    select(&fixture.doc, (0, 4), (0, 8));
    assert!(fixture.engine.apply_highlight(0));

    let other = mount(
        r#"<div id="passage"><p>Completely different content.</p></div>"#,
        &store,
    );
    let report = other.engine.wait_restored().await;
    assert_eq!(report.restored, 0);
    assert_eq!(report.missing, 1);
    assert!(marks(&other).is_empty());
}

#[tokio::test(start_paused = true)]
async fn mouseup_in_passage_shows_picker_after_debounce() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;

    select(&fixture.doc, (0, 9), (0, 14));
    let target = fixture.doc.lock().unwrap().text_nodes(fixture.container)[0];
    fixture.bus.dispatch(&BrowserEvent::MouseUp {
        target: Some(target),
    });
    settle().await;
    assert!(!fixture.engine.picker().visible);

    tokio::time::advance(Duration::from_millis(150)).await;
    settle().await;

    let picker = fixture.engine.picker();
    assert!(picker.visible);
    assert!(picker.y < 240.0);
}

#[tokio::test]
async fn picker_stays_inside_a_narrow_viewport() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    fixture.engine.wait_restored().await;
    fixture
        .browser
        .set_viewport(Rect::new(0.0, 0.0, 320.0, 480.0));

    select(&fixture.doc, (0, 9), (0, 14));
    let picker = fixture.engine.evaluate_selection();

    assert!(picker.visible);
    assert_eq!(picker.x, 320.0 - PICKER_WIDTH - 8.0);
    assert!(picker.y < 240.0);
}

#[tokio::test]
async fn cleanup_unbinds_listeners() {
    let store = Arc::new(MemoryStore::new());
    let fixture = mount(PASSAGE, &store);
    assert_eq!(fixture.bus.listener_count(), 2);

    fixture.engine.cleanup();
    fixture.engine.cleanup();

    assert_eq!(fixture.bus.listener_count(), 0);
    assert!(fixture.engine.context().is_none());
    select(&fixture.doc, (0, 0), (0, 3));
    assert!(!fixture.engine.apply_highlight(0));
}
