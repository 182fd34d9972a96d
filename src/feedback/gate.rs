//! Feedback prompt scheduling
//!
//! The prompt is scheduled once, a fixed delay after the session starts,
//! until it has been shown for the first time. After that it is scheduled
//! again each time the question count reaches a positive multiple of the
//! configured interval. Only one schedule is pending at a time; a new
//! qualifying event replaces it. Dismissing the prompt never re-arms it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::FeedbackConfig;
use crate::session::SessionEvent;

#[derive(Debug, Default)]
struct GateState {
    question_count: u64,
    has_shown_initial: bool,
    visible: bool,
    /// Bumped on every schedule so a replaced timer never fires
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Usage-driven feedback prompt timer
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct FeedbackGate {
    state: Arc<Mutex<GateState>>,
    delay: Duration,
    every_n: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl FeedbackGate {
    /// Creates a gate that publishes `FeedbackPromptDue` on `events`
    pub fn new(config: &FeedbackConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        let state = GateState {
            has_shown_initial: config.initial_shown,
            ..GateState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            delay: Duration::from_secs(config.prompt_delay_seconds),
            every_n: u64::from(config.every_n_questions.max(1)),
            events,
        }
    }

    /// Session start: schedules the initial prompt if it was never shown
    pub fn start(&self) {
        let mut state = self.lock();
        if !state.has_shown_initial {
            self.schedule(&mut state);
        }
    }

    /// Counts one user-initiated question
    ///
    /// # Returns
    ///
    /// The new question count
    pub fn record_question(&self) -> u64 {
        let mut state = self.lock();
        state.question_count += 1;
        if state.has_shown_initial && state.question_count % self.every_n == 0 {
            self.schedule(&mut state);
        }
        state.question_count
    }

    /// Hides a visible prompt without scheduling another
    ///
    /// # Returns
    ///
    /// Whether a prompt was visible
    pub fn dismiss(&self) -> bool {
        let mut state = self.lock();
        let was_visible = std::mem::replace(&mut state.visible, false);
        tracing::debug!(question_count = state.question_count, "Feedback prompt dismissed");
        was_visible
    }

    pub fn question_count(&self) -> u64 {
        self.lock().question_count
    }

    pub fn has_shown_initial(&self) -> bool {
        self.lock().has_shown_initial
    }

    pub fn is_visible(&self) -> bool {
        self.lock().visible
    }

    /// Returns true while a prompt timer is armed
    pub fn is_pending(&self) -> bool {
        self.lock()
            .pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn schedule(&self, state: &mut GateState) {
        if let Some(previous) = state.pending.take() {
            previous.abort();
        }
        state.generation += 1;
        let generation = state.generation;

        tracing::debug!(
            question_count = state.question_count,
            delay_secs = self.delay.as_secs(),
            "Feedback prompt scheduled"
        );

        let shared = Arc::clone(&self.state);
        let events = self.events.clone();
        let delay = self.delay;
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let question_count = {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation != generation {
                    return;
                }
                state.has_shown_initial = true;
                state.visible = true;
                state.question_count
            };

            tracing::info!(question_count, "Feedback prompt due");
            // No subscribers is not an error.
            let _ = events.send(SessionEvent::FeedbackPromptDue { question_count });
        }));
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
