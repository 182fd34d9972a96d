//! Scripted in-process generation service for tests
//!
//! Each call to `open` consumes the next queued script. A script is a list
//! of steps: emit an event, pause, or hang forever (to model a stream that a
//! newer request supersedes). Requests are recorded for later assertions.
//!
//! ```ignore
//! let service = FakeGenerationService::new();
//! service.push_script(answer_script("t1", &["Hyper", "tension"], json!({}), Some(json!(29))));
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::StreamFailure;
use crate::stream::{
    guard_terminal, CompletionPayload, EventStream, GenerationRequest, GenerationService,
    StreamEvent, StreamStatus,
};

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum Step {
    Emit(StreamEvent),
    Pause(Duration),
    /// Never yields again
    Hang,
}

/// Generation service that replays queued scripts
#[derive(Debug, Default)]
pub struct FakeGenerationService {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GenerationService for FakeGenerationService {
    async fn open(&self, request: GenerationRequest) -> EventStream {
        self.requests.lock().unwrap().push(request);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Emit(StreamEvent::Failure(StreamFailure::ServerError))]);

        let stream = futures::stream::unfold(VecDeque::from(steps), |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    Step::Emit(event) => return Some((event, steps)),
                    Step::Pause(duration) => tokio::time::sleep(duration).await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        });

        guard_terminal(Box::pin(stream))
    }
}

/// Builds a completion payload with the given thread id
pub fn completion(thread_id: &str, content: &str, citations: Value) -> CompletionPayload {
    CompletionPayload {
        processed_content: content.to_string(),
        citations,
        thread_id: Some(thread_id.to_string()),
        ..CompletionPayload::default()
    }
}

/// Standard successful script: statuses, deltas, then completion
pub fn answer_script(
    thread_id: &str,
    deltas: &[&str],
    citations: Value,
    remaining_limit: Option<Value>,
) -> Vec<Step> {
    let mut steps = vec![
        Step::Emit(StreamEvent::status(StreamStatus::Processing)),
        Step::Emit(StreamEvent::status(StreamStatus::Searching)),
        Step::Emit(StreamEvent::status(StreamStatus::Summarizing)),
    ];
    steps.extend(deltas.iter().map(|d| Step::Emit(StreamEvent::Delta(d.to_string()))));

    let mut payload = completion(thread_id, &deltas.concat(), citations);
    payload.remaining_limit = remaining_limit;
    steps.push(Step::Emit(StreamEvent::status(StreamStatus::Complete)));
    steps.push(Step::Emit(StreamEvent::Complete(Box::new(payload))));
    steps
}

/// Script that fails with `kind` after one status event
pub fn failure_script(kind: StreamFailure) -> Vec<Step> {
    vec![
        Step::Emit(StreamEvent::status(StreamStatus::Processing)),
        Step::Emit(StreamEvent::Failure(kind)),
    ]
}
