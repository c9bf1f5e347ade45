mod common;

use std::time::Duration;

use common::{settle, FakeExamApi};
use ielts_exam_runtime::metrics::ANSWERS_PENDING;
use ielts_exam_runtime::models::AnswerValue;
use ielts_exam_runtime::services::AnswerSync;

const DEBOUNCE: Duration = Duration::from_millis(800);

#[tokio::test(start_paused = true)]
async fn pending_gauge_sums_concurrent_attempts() {
    common::init_tracing();
    let api = FakeExamApi::new();
    let base = ANSWERS_PENDING.get();

    let first = AnswerSync::new(api.clone(), "attempt-a", DEBOUNCE);
    let second = AnswerSync::new(api.clone(), "attempt-b", DEBOUNCE);

    first.submit_answer("1", AnswerValue::text("river"), false).await;
    first.submit_answer("2", AnswerValue::text("delta"), false).await;
    second.submit_answer("1", AnswerValue::text("lake"), false).await;
    settle().await;
    assert_eq!(ANSWERS_PENDING.get(), base + 3);

    assert_eq!(second.flush_pending().await, 1);
    assert_eq!(ANSWERS_PENDING.get(), base + 2);

    assert_eq!(first.cancel_all(), 2);
    assert_eq!(ANSWERS_PENDING.get(), base);
}
