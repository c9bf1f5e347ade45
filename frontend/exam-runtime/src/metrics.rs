use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Backend calls
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_api_requests_total",
        "Total number of exam backend requests",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "exam_api_request_duration_seconds",
        "Exam backend request duration in seconds",
        &["operation"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Answers
    pub static ref ANSWER_SAVES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_answer_saves_total",
        "Answer persistence calls by input kind and outcome",
        &["mode", "status"]
    )
    .unwrap();

    pub static ref ANSWERS_PENDING: IntGauge = register_int_gauge!(
        "exam_answers_pending",
        "Debounced answers waiting to be persisted"
    )
    .unwrap();

    // Timer & lifecycle
    pub static ref SECTION_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_section_transitions_total",
        "Section loads and advances",
        &["section", "trigger"]
    )
    .unwrap();

    pub static ref TIMER_EXPIRATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_timer_expirations_total",
        "Section countdowns that reached zero",
        &["section"]
    )
    .unwrap();

    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_submissions_total",
        "Final submission outcomes",
        &["status"]
    )
    .unwrap();

    // Integrity
    pub static ref INTEGRITY_VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_integrity_violations_total",
        "Exam integrity violations detected",
        &["violation_type"]
    )
    .unwrap();

    // Highlights
    pub static ref HIGHLIGHT_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_highlight_operations_total",
        "Highlight engine operations",
        &["operation", "path"]
    )
    .unwrap();

    pub static ref HIGHLIGHT_RESTORE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_highlight_restore_total",
        "Persisted highlights processed during restoration",
        &["result"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a backend call with metrics
pub async fn track_api_call<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    API_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    API_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}
