//! Conversation session
//!
//! [`Session`] drives one conversation: it appends questions to the
//! [`ConversationState`], opens a generation stream per question, folds the
//! stream's events into the placeholder answer, and runs the non-critical
//! effects (thread save, quota propagation) once an answer completes.
//!
//! # Turns and supersession
//!
//! Each question is a turn that owns a [`CancellationToken`]. Submitting a
//! new question (or reloading) cancels the previous turn inside the same
//! critical section that appends the new messages, so a stale stream can
//! never mutate a newer placeholder. The superseded placeholder is marked
//! interrupted and its stream is dropped.
//!
//! # Change notification
//!
//! Observers call [`Session::subscribe`] and receive [`SessionEvent`]s.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use cliniq::config::Config;
//! use cliniq::session::{Session, SessionIdentity};
//! use cliniq::storage::MemoryThreadStore;
//! use cliniq::stream::http::HttpGenerationClient;
//!
//! # async fn run() -> cliniq::error::Result<()> {
//! let config = Config::default();
//! let service = Arc::new(HttpGenerationClient::from_config(&config.service)?);
//! let store = Arc::new(MemoryThreadStore::new());
//! let session = Session::new(SessionIdentity::new("user-1"), service, store, &config);
//! session.start();
//!
//! let outcome = session.ask("What is hypertension?", false).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod message;
pub mod metrics;
pub mod reload;
pub mod state;

pub use message::{Answer, Message, QuestionKind, Role, ThreadRef};
pub use reload::ReloadOutcome;
pub use state::{CompletedTurn, ConversationState, RemovedTurn, Submission};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::config::{Config, FallbackMessages};
use crate::effects::{Effect, EffectDispatcher};
use crate::error::{CliniqError, Result, StreamFailure};
use crate::feedback::{FeedbackGate, FeedbackKind, FeedbackRecord};
use crate::quota::{QuotaSink, QuotaTracker};
use crate::storage::ThreadStore;
use crate::stream::{
    AnswerMode, CompletionPayload, GenerationRequest, GenerationService, RequestContext,
    StreamEvent, StreamStatus,
};

use self::metrics::StreamMetrics;

const EVENT_CAPACITY: usize = 256;

/// Who is asking, and in which conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub conversation_id: String,
    pub user_id: String,
}

impl SessionIdentity {
    /// Identity for a new conversation
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Ulid::new().to_string(),
            user_id: user_id.into(),
        }
    }

    /// Identity for an existing conversation
    pub fn resume(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Change notifications published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Messages were appended, removed or replaced
    MessagesChanged,
    Delta {
        message_id: String,
        text: String,
    },
    Status {
        message_id: String,
        status: StreamStatus,
    },
    Completed {
        message_id: String,
        thread_id: String,
    },
    Failed {
        message_id: String,
        kind: StreamFailure,
    },
    QuotaUpdated {
        remaining: u64,
        nearly_exhausted: bool,
    },
    FeedbackPromptDue {
        question_count: u64,
    },
}

/// How a question's turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Answered { thread_id: String },
    /// A fallback answer is shown
    Failed { kind: StreamFailure },
    /// A newer submission replaced this turn
    Superseded,
}

/// Per-question options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AskOptions {
    pub follow_up: bool,
    /// Ask the service for an image answer
    pub direct_image: bool,
}

#[derive(Debug, Clone)]
struct SessionSettings {
    mode: AnswerMode,
    locale: Option<String>,
    failure_delay: (Duration, Duration),
    fallback: FallbackMessages,
}

struct ActiveTurn {
    assistant_id: String,
    token: CancellationToken,
}

#[derive(Default)]
struct Core {
    state: ConversationState,
    active: Option<ActiveTurn>,
    /// Completed threads whose save has not finished, by thread id
    pending_saves: HashMap<String, watch::Receiver<bool>>,
}

/// A turn being driven by `ask` or `reload`
struct Turn {
    submission: Submission,
    question: String,
    token: CancellationToken,
}

/// Async driver of one conversation
pub struct Session {
    identity: SessionIdentity,
    service: Arc<dyn GenerationService>,
    store: Arc<dyn ThreadStore>,
    quota_sink: Option<Arc<dyn QuotaSink>>,
    effects: EffectDispatcher,
    quota: QuotaTracker,
    gate: FeedbackGate,
    events: broadcast::Sender<SessionEvent>,
    settings: SessionSettings,
    core: Mutex<Core>,
}

impl Session {
    /// Creates a session
    ///
    /// Call [`Session::start`] from within a tokio runtime to arm the
    /// initial feedback prompt.
    pub fn new(
        identity: SessionIdentity,
        service: Arc<dyn GenerationService>,
        store: Arc<dyn ThreadStore>,
        config: &Config,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            service,
            effects: EffectDispatcher::new(Arc::clone(&store), None),
            store,
            quota_sink: None,
            quota: QuotaTracker::new(config.quota.low_water),
            gate: FeedbackGate::new(&config.feedback, events.clone()),
            events,
            settings: SessionSettings {
                mode: config.service.mode,
                locale: config.service.locale.clone(),
                failure_delay: config.session.failure_delay_range(),
                fallback: config.session.fallback.clone(),
            },
            core: Mutex::new(Core::default()),
        }
    }

    /// Propagates quota updates to `sink`
    pub fn with_quota_sink(mut self, sink: Arc<dyn QuotaSink>) -> Self {
        self.effects = EffectDispatcher::new(Arc::clone(&self.store), Some(Arc::clone(&sink)));
        self.quota_sink = Some(sink);
        self
    }

    /// Arms the initial feedback prompt
    pub fn start(&self) {
        self.gate.start();
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Subscribes to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the conversation's messages
    pub fn messages(&self) -> Vec<Message> {
        self.lock().state.messages().to_vec()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock().state.message(id).cloned()
    }

    /// Thread a follow-up asked now would attach to
    pub fn last_answerable_thread(&self) -> Option<String> {
        self.lock().state.last_answerable_thread().map(str::to_string)
    }

    pub fn last_assistant_id(&self) -> Option<String> {
        self.lock().state.last_assistant_id().map(str::to_string)
    }

    /// Returns true while a turn is in flight
    pub fn is_streaming(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn feedback_gate(&self) -> &FeedbackGate {
        &self.gate
    }

    /// Asks a question and drives its stream to completion
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::EmptyQuestion` for blank input. Stream failures
    /// are not errors; they yield [`AskOutcome::Failed`].
    pub async fn ask(&self, question: &str, follow_up: bool) -> Result<AskOutcome> {
        self.ask_with(
            question,
            AskOptions {
                follow_up,
                ..AskOptions::default()
            },
        )
        .await
    }

    /// [`Session::ask`] with explicit options
    pub async fn ask_with(&self, question: &str, options: AskOptions) -> Result<AskOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CliniqError::EmptyQuestion.into());
        }

        let turn = {
            let mut core = self.lock();
            begin_turn(&mut core, question, options.follow_up)
        };
        self.gate.record_question();
        self.emit(SessionEvent::MessagesChanged);

        Ok(self.drive(turn, options.direct_image).await)
    }

    /// Rebuilds the conversation from the store
    ///
    /// Does not count as a question.
    ///
    /// # Returns
    ///
    /// The number of threads loaded
    pub async fn resume(&self) -> Result<usize> {
        let threads = self
            .store
            .load_threads(&self.identity.conversation_id)
            .await?;

        {
            let mut core = self.lock();
            if let Some(active) = core.active.take() {
                active.token.cancel();
            }
            core.state.load(&threads);
        }

        if self.quota.remaining().is_none() {
            if let Some(sink) = &self.quota_sink {
                match sink.load_remaining(&self.identity.user_id).await {
                    Ok(Some(remaining)) => self.quota.set_remaining(remaining),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Failed to load stored quota: {:#}", e),
                }
            }
        }

        tracing::info!(
            conversation_id = %self.identity.conversation_id,
            threads = threads.len(),
            "Conversation resumed"
        );
        self.emit(SessionEvent::MessagesChanged);
        Ok(threads.len())
    }

    /// Records helpful / not-helpful feedback for an answered thread
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::MissingThreadId` for a temporary thread id and
    /// propagates store failures.
    pub async fn submit_feedback(
        &self,
        thread_id: &str,
        kind: FeedbackKind,
        options: Vec<String>,
        free_text: &str,
    ) -> Result<FeedbackRecord> {
        if thread_id.trim().is_empty() || ThreadRef::is_temporary(thread_id) {
            return Err(CliniqError::MissingThreadId.into());
        }

        let record = FeedbackRecord::new(thread_id, kind, options, free_text);
        self.store
            .save_feedback(&self.identity.conversation_id, &record)
            .await?;
        self.gate.dismiss();

        tracing::info!(thread_id, kind = %kind, "Feedback recorded");
        Ok(record)
    }

    /// Closes the feedback prompt without recording feedback
    ///
    /// # Returns
    ///
    /// `false` when no prompt was open
    pub fn dismiss_feedback(&self) -> bool {
        self.gate.dismiss()
    }

    async fn drive(&self, turn: Turn, direct_image: bool) -> AskOutcome {
        let assistant_id = turn.submission.assistant_message_id.clone();
        let metrics = StreamMetrics::new(turn.submission.parent_thread_id.is_some());

        let context = RequestContext {
            session_id: self.identity.conversation_id.clone(),
            user_id: self.identity.user_id.clone(),
            parent_thread_id: turn.submission.parent_thread_id.clone(),
            mode: self.settings.mode,
            locale: self.settings.locale.clone(),
        };
        let request =
            GenerationRequest::new(turn.question.clone(), &context).with_direct_image(direct_image);

        tracing::debug!(
            message_id = %assistant_id,
            parent_thread_id = ?context.parent_thread_id,
            "Turn started"
        );

        let mut stream = tokio::select! {
            biased;
            _ = turn.token.cancelled() => return superseded(&metrics),
            stream = self.service.open(request) => stream,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = turn.token.cancelled() => return superseded(&metrics),
                event = stream.next() => event,
            };

            match event {
                Some(StreamEvent::Delta(text)) => {
                    metrics.record_delta();
                    if self
                        .with_active(&turn, |state| state.apply_delta(&assistant_id, &text))
                        .is_none()
                    {
                        return superseded(&metrics);
                    }
                    self.emit(SessionEvent::Delta {
                        message_id: assistant_id.clone(),
                        text,
                    });
                }
                Some(StreamEvent::Status { status, payload }) => {
                    if self
                        .with_active(&turn, |state| {
                            state.apply_status(&assistant_id, status, payload.as_ref())
                        })
                        .is_none()
                    {
                        return superseded(&metrics);
                    }
                    self.emit(SessionEvent::Status {
                        message_id: assistant_id.clone(),
                        status,
                    });
                }
                Some(StreamEvent::Complete(payload)) => {
                    return self.complete(&turn, &payload, &metrics).await;
                }
                Some(StreamEvent::Failure(kind)) => {
                    return self.fail(&turn, kind, &metrics).await;
                }
                None => {
                    return self.fail(&turn, StreamFailure::ServerError, &metrics).await;
                }
            }
        }
    }

    async fn complete(
        &self,
        turn: &Turn,
        payload: &CompletionPayload,
        metrics: &StreamMetrics,
    ) -> AskOutcome {
        let assistant_id = &turn.submission.assistant_message_id;

        let applied = {
            let mut core = self.lock();
            if !is_active(&core, turn) {
                None
            } else {
                let result = core.state.apply_complete(assistant_id, payload);
                Some(result.map(|done| {
                    core.active = None;
                    let (saved, pending) = watch::channel(false);
                    core.pending_saves.insert(done.thread_id.clone(), pending);
                    (done, saved)
                }))
            }
        };

        let (done, saved) = match applied {
            None => return superseded(metrics),
            Some(Ok(applied)) => applied,
            Some(Err(e)) => {
                tracing::warn!(message_id = %assistant_id, "Unusable completion: {:#}", e);
                let kind = e
                    .downcast_ref::<CliniqError>()
                    .map_or(StreamFailure::ServerError, CliniqError::as_stream_failure);
                return self.fail(turn, kind, metrics).await;
            }
        };

        metrics.record_outcome("answered");
        tracing::info!(
            thread_id = %done.thread_id,
            deltas = metrics.deltas(),
            elapsed_ms = metrics.elapsed().as_millis() as u64,
            "Answer completed"
        );

        let mut effects = vec![Effect::SaveThread {
            conversation_id: self.identity.conversation_id.clone(),
            thread: done.thread,
        }];

        if let Some(remaining) = payload
            .remaining_limit
            .as_ref()
            .and_then(|raw| self.quota.observe(raw))
        {
            effects.push(Effect::PersistQuota {
                user_id: self.identity.user_id.clone(),
                remaining,
            });
            self.emit(SessionEvent::QuotaUpdated {
                remaining,
                nearly_exhausted: self.quota.is_nearly_exhausted(),
            });
        }

        self.emit(SessionEvent::Completed {
            message_id: assistant_id.clone(),
            thread_id: done.thread_id.clone(),
        });
        self.emit(SessionEvent::MessagesChanged);

        self.effects.dispatch(effects).await;
        saved.send_replace(true);
        self.lock().pending_saves.remove(&done.thread_id);

        AskOutcome::Answered {
            thread_id: done.thread_id,
        }
    }

    async fn fail(&self, turn: &Turn, kind: StreamFailure, metrics: &StreamMetrics) -> AskOutcome {
        let assistant_id = &turn.submission.assistant_message_id;
        tracing::warn!(message_id = %assistant_id, failure = %kind, "Answer stream failed");

        let delay = self.failure_delay();
        tokio::select! {
            biased;
            _ = turn.token.cancelled() => return superseded(metrics),
            _ = tokio::time::sleep(delay) => {}
        }

        let applied = {
            let mut core = self.lock();
            if is_active(&core, turn) {
                let fallback = self.settings.fallback.for_failure(kind);
                core.state.apply_failure(assistant_id, kind, fallback);
                core.active = None;
                true
            } else {
                false
            }
        };
        if !applied {
            return superseded(metrics);
        }

        metrics.record_outcome(kind.as_str());
        self.emit(SessionEvent::Failed {
            message_id: assistant_id.clone(),
            kind,
        });
        self.emit(SessionEvent::MessagesChanged);

        AskOutcome::Failed { kind }
    }

    /// Randomized delay before a fallback is shown
    fn failure_delay(&self) -> Duration {
        let (min, max) = self.settings.failure_delay;
        if max <= min {
            return min;
        }
        let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    /// Runs `f` on the state if `turn` is still the active turn
    fn with_active<T>(&self, turn: &Turn, f: impl FnOnce(&mut ConversationState) -> T) -> Option<T> {
        let mut core = self.lock();
        if is_active(&core, turn) {
            Some(f(&mut core.state))
        } else {
            None
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Appends a question and makes it the active turn, superseding any other
fn begin_turn(core: &mut Core, question: &str, follow_up: bool) -> Turn {
    supersede_active(core);
    let submission = core.state.submit(question, follow_up);
    activate(core, submission, question)
}

/// Re-inserts a reloaded question in place and makes it the active turn
fn begin_resubmit(core: &mut Core, removed: &RemovedTurn) -> Turn {
    supersede_active(core);
    let submission = core.state.resubmit(removed);
    activate(core, submission, &removed.question)
}

fn supersede_active(core: &mut Core) {
    if let Some(previous) = core.active.take() {
        previous.token.cancel();
        core.state.mark_interrupted(&previous.assistant_id);
        tracing::debug!(message_id = %previous.assistant_id, "Turn superseded");
    }
}

fn activate(core: &mut Core, submission: Submission, question: &str) -> Turn {
    let token = CancellationToken::new();
    core.active = Some(ActiveTurn {
        assistant_id: submission.assistant_message_id.clone(),
        token: token.clone(),
    });

    Turn {
        submission,
        question: question.to_string(),
        token,
    }
}

fn is_active(core: &Core, turn: &Turn) -> bool {
    core.active
        .as_ref()
        .is_some_and(|active| active.assistant_id == turn.submission.assistant_message_id)
}

fn superseded(metrics: &StreamMetrics) -> AskOutcome {
    metrics.record_outcome("superseded");
    AskOutcome::Superseded
}
