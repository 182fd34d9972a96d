//! HTTP/SSE client for the answer-generation service
//!
//! [`HttpGenerationClient`] POSTs a [`GenerationRequest`] as JSON and reads
//! the `text/event-stream` response. Each SSE data frame is a JSON object
//! tagged by `type`:
//!
//! ```text
//! {"type":"content","content":"Hyper"}
//! {"type":"status","status":"searching"}
//! {"type":"status","status":"complete_image","data":{"svgContent":["<svg/>"]}}
//! {"type":"complete","data":{"threadId":"t1","processedContent":"...", ...}}
//! {"type":"error","kind":"rate_limited","message":"..."}
//! ```
//!
//! # Failure classification
//!
//! - HTTP 429 and 402 -- `rate_limited`
//! - connect errors, timeouts and stalled bodies -- `offline`
//! - any other non-success status or transport error -- `server_error`
//!
//! # Cancellation
//!
//! Parsing runs in a spawned task that forwards events over a channel. When
//! the returned stream is dropped the task notices the closed channel and
//! drops the response body, aborting the request.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::ServiceConfig;
use crate::error::{CliniqError, Result, StreamFailure};
use crate::stream::sse::SseDecoder;
use crate::stream::{
    guard_terminal, CompletionPayload, EventStream, GenerationRequest, GenerationService,
    StatusPayload, StreamEvent, StreamStatus,
};

/// Generation service client speaking JSON-over-SSE
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use cliniq::stream::http::HttpGenerationClient;
///
/// let client = HttpGenerationClient::new(
///     url::Url::parse("http://localhost:8000/api/stream").unwrap(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    http_client: reqwest::Client,
    endpoint: url::Url,
    /// Maximum silence between body chunks before the stream is abandoned
    idle_timeout: Duration,
    headers: HashMap<String, String>,
}

impl HttpGenerationClient {
    /// Creates a client for `endpoint`
    ///
    /// `timeout` bounds connection setup and the silence between chunks of
    /// the streamed body; the stream as a whole may run longer.
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::Config` if the HTTP client cannot be built.
    pub fn new(endpoint: url::Url, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| CliniqError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
            idle_timeout: timeout,
            headers: HashMap::new(),
        })
    }

    /// Creates a client from the `service` configuration section
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| CliniqError::Config(format!("Invalid service endpoint: {}", e)))?;
        Self::new(endpoint, Duration::from_secs(config.timeout_seconds))
    }

    /// Adds a header sent with every request (e.g. an authorization token)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl GenerationService for HttpGenerationClient {
    async fn open(&self, request: GenerationRequest) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.clone();

        tokio::spawn(async move {
            client.run(request, tx).await;
        });

        guard_terminal(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

impl HttpGenerationClient {
    async fn run(&self, request: GenerationRequest, tx: mpsc::UnboundedSender<StreamEvent>) {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Accept", "text/event-stream")
            .json(&request);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        tracing::debug!(
            session_id = %request.session_id,
            follow_up = request.parent_thread_id.is_some(),
            "Opening generation stream"
        );

        let response = tokio::select! {
            _ = tx.closed() => return,
            sent = req.send() => sent,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let kind = classify_transport_error(&e);
                tracing::warn!("Generation request failed ({}): {}", kind, e);
                let _ = tx.send(StreamEvent::Failure(kind));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let kind = classify_status(status);
            tracing::warn!("Generation service returned HTTP {} ({})", status, kind);
            let _ = tx.send(StreamEvent::Failure(kind));
            return;
        }

        pump_body(response.bytes_stream(), &tx, self.idle_timeout).await;
    }
}

/// Decodes an SSE body into events until a terminal event, the end of the
/// body, or the consumer going away
async fn pump_body(
    body: impl Stream<Item = reqwest::Result<Bytes>>,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    idle_timeout: Duration,
) {
    let mut decoder = SseDecoder::new();
    tokio::pin!(body);

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("Generation stream abandoned by consumer");
                return;
            }
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                tracing::warn!("Generation stream stalled for {:?}", idle_timeout);
                let _ = tx.send(StreamEvent::Failure(StreamFailure::Offline));
                return;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                let kind = classify_transport_error(&e);
                tracing::warn!("Generation stream interrupted ({}): {}", kind, e);
                let _ = tx.send(StreamEvent::Failure(kind));
                return;
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        for frame in decoder.push_bytes(&chunk) {
            if !forward(tx, &frame) {
                return;
            }
        }
    }

    if let Some(frame) = decoder.finish() {
        forward(tx, &frame);
    }
}

/// Sends the decoded frame; returns false once the stream should stop
fn forward(tx: &mpsc::UnboundedSender<StreamEvent>, frame: &str) -> bool {
    let Some(event) = decode_frame(frame) else {
        return true;
    };
    let terminal = event.is_terminal();
    if tx.send(event).is_err() {
        return false;
    }
    !terminal
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Content {
        #[serde(default)]
        content: String,
    },
    Status {
        status: String,
        #[serde(default)]
        data: Option<StatusPayload>,
    },
    Complete {
        #[serde(default)]
        data: CompletionPayload,
    },
    Error {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Decodes one SSE data frame into a stream event
///
/// Frames that are not valid JSON, have an unknown `type`, or report an
/// unknown status are logged and skipped.
pub fn decode_frame(frame: &str) -> Option<StreamEvent> {
    let wire: WireEvent = match serde_json::from_str(frame) {
        Ok(w) => w,
        Err(e) => {
            tracing::debug!("Skipping undecodable stream frame: {}", e);
            return None;
        }
    };

    match wire {
        WireEvent::Content { content } => Some(StreamEvent::Delta(content)),
        WireEvent::Status { status, data } => match StreamStatus::parse(&status) {
            Some(status) => Some(StreamEvent::Status {
                status,
                payload: data,
            }),
            None => {
                tracing::debug!("Skipping unknown stream status: {}", status);
                None
            }
        },
        WireEvent::Complete { data } => Some(StreamEvent::Complete(Box::new(data))),
        WireEvent::Error { kind, message } => {
            let kind = StreamFailure::from_kind(kind.as_deref().unwrap_or_default());
            if let Some(message) = message {
                tracing::warn!("Generation service reported {}: {}", kind, message);
            }
            Some(StreamEvent::Failure(kind))
        }
    }
}

/// Maps a non-success HTTP status to a failure kind
pub fn classify_status(status: reqwest::StatusCode) -> StreamFailure {
    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS | reqwest::StatusCode::PAYMENT_REQUIRED => {
            StreamFailure::RateLimited
        }
        _ => StreamFailure::ServerError,
    }
}

fn classify_transport_error(error: &reqwest::Error) -> StreamFailure {
    if let Some(status) = error.status() {
        return classify_status(status);
    }
    if error.is_connect() || error.is_timeout() {
        StreamFailure::Offline
    } else {
        StreamFailure::ServerError
    }
}
