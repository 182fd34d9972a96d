//! Answer-generation streaming
//!
//! This module defines the event model of a generation stream and the
//! [`GenerationService`] seam the conversation engine consumes. Concrete
//! implementations live in submodules:
//!
//! - [`http::HttpGenerationClient`] -- POSTs the question to the generation
//!   service and decodes its server-sent event body.
//! - [`fake::FakeGenerationService`] -- scripted in-process service used in
//!   tests (cfg(test) only).
//!
//! A stream yields zero or more [`StreamEvent::Delta`] and
//! [`StreamEvent::Status`] events followed by exactly one terminal event,
//! either [`StreamEvent::Complete`] or [`StreamEvent::Failure`]. Failures are
//! events, not errors: `open` never fails.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::StreamFailure;

pub mod http;
pub mod sse;

#[cfg(test)]
pub mod fake;

/// Boxed stream of generation events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Progress reported by the generation service while an answer is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Processing,
    Searching,
    Summarizing,
    Formatting,
    Complete,
    /// Image generation finished; may carry image content
    CompleteImage,
}

impl StreamStatus {
    /// Parses a wire status name
    ///
    /// # Examples
    ///
    /// ```
    /// use cliniq::stream::StreamStatus;
    ///
    /// assert_eq!(StreamStatus::parse("complete_image"), Some(StreamStatus::CompleteImage));
    /// assert_eq!(StreamStatus::parse("thinking"), None);
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "processing" => Some(Self::Processing),
            "searching" => Some(Self::Searching),
            "summarizing" => Some(Self::Summarizing),
            "formatting" => Some(Self::Formatting),
            "complete" => Some(Self::Complete),
            "complete_image" => Some(Self::CompleteImage),
            _ => None,
        }
    }

    /// Returns true while the answer is still being produced
    pub fn is_loading(&self) -> bool {
        !matches!(self, Self::Complete)
    }

    /// Progress text shown to the user
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processing => "Thinking",
            Self::Searching => "Searching sources",
            Self::Summarizing => "Summarizing evidence",
            Self::Formatting => "Formatting answer",
            Self::Complete => "Done",
            Self::CompleteImage => "Image ready",
        }
    }
}

/// Image content attached to a `complete_image` status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(default, deserialize_with = "nullable")]
    pub svg_content: Vec<Option<String>>,
}

/// Final structured payload of a successful stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    #[serde(default, deserialize_with = "nullable")]
    pub processed_content: String,

    /// Raw citation records; normalized by the citation resolver
    #[serde(default)]
    pub citations: Value,

    #[serde(default, deserialize_with = "nullable")]
    pub svg_content: Vec<Option<String>>,

    #[serde(default)]
    pub thread_id: Option<String>,

    /// Remaining question allowance: number, numeric string or "N/A"
    #[serde(default)]
    pub remaining_limit: Option<Value>,

    /// Suggested follow-up questions
    #[serde(default, deserialize_with = "nullable")]
    pub questions_followed: Vec<String>,

    #[serde(default)]
    pub search_data: Value,

    #[serde(default)]
    pub api_metadata: Option<Value>,
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One event of a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text fragment to append to the answer
    Delta(String),
    /// Status change, optionally with image content
    Status {
        status: StreamStatus,
        payload: Option<StatusPayload>,
    },
    /// Terminal success
    Complete(Box<CompletionPayload>),
    /// Terminal failure
    Failure(StreamFailure),
}

impl StreamEvent {
    pub fn status(status: StreamStatus) -> Self {
        Self::Status {
            status,
            payload: None,
        }
    }

    /// Returns true for the two terminal event kinds
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Failure(_))
    }
}

/// Answer style requested from the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Short answer without a literature search
    Instant,
    /// Evidence search with citations
    #[default]
    Research,
}

impl std::str::FromStr for AnswerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(Self::Instant),
            "research" => Ok(Self::Research),
            other => Err(format!("unknown answer mode: {}", other)),
        }
    }
}

/// Per-request context supplied by the session
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub session_id: String,
    pub user_id: String,
    /// Resolved parent thread for follow-ups; `None` for root questions
    pub parent_thread_id: Option<String>,
    pub mode: AnswerMode,
    pub locale: Option<String>,
}

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub question: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
    pub mode: AnswerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub direct_image_request: bool,
}

impl GenerationRequest {
    /// Builds a request for `question` in the given context
    pub fn new(question: impl Into<String>, context: &RequestContext) -> Self {
        Self {
            question: question.into(),
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            parent_thread_id: context.parent_thread_id.clone(),
            mode: context.mode,
            locale: context.locale.clone(),
            direct_image_request: false,
        }
    }

    pub fn with_direct_image(mut self, direct_image_request: bool) -> Self {
        self.direct_image_request = direct_image_request;
        self
    }
}

/// Source of answer-generation streams
///
/// Implementations must deliver failures as a terminal
/// [`StreamEvent::Failure`]. Dropping the returned stream abandons the
/// request.
#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    /// Opens a generation stream for `request`
    async fn open(&self, request: GenerationRequest) -> EventStream;
}

/// Per-stream completion latch
///
/// Once a terminal event has been accepted every later event is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamGuard {
    completed: bool,
}

impl StreamGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `event` may be applied, latching on terminal events
    pub fn accept(&mut self, event: &StreamEvent) -> bool {
        if self.completed {
            return false;
        }
        if event.is_terminal() {
            self.completed = true;
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

/// Enforces the terminal-event contract on an arbitrary event stream
///
/// Nothing is yielded after the first terminal event, and a stream that
/// ends without one yields a `server_error` failure.
pub fn guard_terminal(stream: EventStream) -> EventStream {
    Box::pin(futures::stream::unfold(
        (stream, StreamGuard::new()),
        |(mut inner, mut guard)| async move {
            if guard.is_completed() {
                return None;
            }
            loop {
                match inner.next().await {
                    Some(event) => {
                        if guard.accept(&event) {
                            return Some((event, (inner, guard)));
                        }
                    }
                    None => {
                        tracing::warn!("Generation stream ended without a terminal event");
                        guard.complete();
                        return Some((
                            StreamEvent::Failure(StreamFailure::ServerError),
                            (inner, guard),
                        ));
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(events: Vec<StreamEvent>) -> Vec<StreamEvent> {
        let stream: EventStream = Box::pin(futures::stream::iter(events));
        futures::executor::block_on(guard_terminal(stream).collect::<Vec<_>>())
    }

    #[test]
    fn test_guard_drops_events_after_terminal() {
        let events = collect(vec![
            StreamEvent::Delta("a".into()),
            StreamEvent::Failure(StreamFailure::Offline),
            StreamEvent::Delta("late".into()),
            StreamEvent::Complete(Box::default()),
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("a".into()),
                StreamEvent::Failure(StreamFailure::Offline)
            ]
        );
    }

    #[test]
    fn test_guard_synthesizes_failure_on_truncated_stream() {
        let events = collect(vec![StreamEvent::Delta("partial".into())]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Failure(StreamFailure::ServerError))
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_stream_guard_latches() {
        let mut guard = StreamGuard::new();
        assert!(guard.accept(&StreamEvent::status(StreamStatus::Searching)));
        assert!(guard.accept(&StreamEvent::Complete(Box::default())));
        assert!(guard.is_completed());
        assert!(!guard.accept(&StreamEvent::Delta("x".into())));
    }

    #[test]
    fn test_complete_status_is_not_terminal() {
        assert!(!StreamEvent::status(StreamStatus::Complete).is_terminal());
        assert!(!StreamStatus::Complete.is_loading());
        assert!(StreamStatus::Searching.is_loading());
    }

    #[test]
    fn test_completion_payload_tolerates_nulls() {
        let payload: CompletionPayload = serde_json::from_value(json!({
            "processedContent": null,
            "svgContent": null,
            "questionsFollowed": null,
            "threadId": "t1"
        }))
        .unwrap();
        assert!(payload.processed_content.is_empty());
        assert!(payload.svg_content.is_empty());
        assert_eq!(payload.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_request_serialization_is_camel_case() {
        let context = RequestContext {
            session_id: "s1".into(),
            user_id: "u1".into(),
            parent_thread_id: Some("t1".into()),
            mode: AnswerMode::Research,
            locale: None,
        };
        let value = serde_json::to_value(GenerationRequest::new("Q?", &context)).unwrap();
        assert_eq!(value["parentThreadId"], "t1");
        assert_eq!(value["mode"], "research");
        assert!(value.get("locale").is_none());
        assert!(value.get("directImageRequest").is_none());

        let value =
            serde_json::to_value(GenerationRequest::new("Q?", &context).with_direct_image(true))
                .unwrap();
        assert_eq!(value["directImageRequest"], true);
    }

    #[test]
    fn test_answer_mode_from_str() {
        assert_eq!("Instant".parse::<AnswerMode>(), Ok(AnswerMode::Instant));
        assert!("deep".parse::<AnswerMode>().is_err());
    }
}
