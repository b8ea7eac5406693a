//! Helpers for exercising pipelines in tests: feed a scripted exchange
//! and assert on every response.

use prompter_core::Message;
use uuid::Uuid;

use crate::pipeline::Pipeline;

/// Run `turns` as one dialog and panic on the first mismatch between an
/// actual and an expected response text.
///
/// # Panics
///
/// On a turn error or a response that differs from the expectation.
pub async fn check_happy_path(pipeline: &Pipeline, turns: &[(&str, &str)]) {
    let dialog_id = Uuid::new_v4().to_string();
    for (index, (request, expected)) in turns.iter().enumerate() {
        let response = pipeline
            .run_turn(Message::text(*request), &dialog_id)
            .await
            .unwrap_or_else(|error| panic!("turn {index} failed for {request:?}: {error}"));
        let text = response.text.as_deref().unwrap_or("");
        assert_eq!(
            text, *expected,
            "unexpected response at turn {index} for request {request:?}"
        );
    }
}
