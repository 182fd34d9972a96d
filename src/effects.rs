//! Non-critical effects of a committed state transition
//!
//! A completed answer produces in-memory state changes (committed under the
//! session lock) plus work that may fail without affecting the user-visible
//! answer: persisting the thread and propagating the quota. The state
//! transition returns those as [`Effect`] values and [`EffectDispatcher`]
//! runs them afterwards, logging failures.

use std::sync::Arc;

use crate::quota::QuotaSink;
use crate::storage::{Thread, ThreadStore};

/// A deferred side effect
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Persist a completed thread
    SaveThread {
        conversation_id: String,
        thread: Thread,
    },
    /// Store the user's remaining-question count
    PersistQuota { user_id: String, remaining: u64 },
}

impl Effect {
    fn name(&self) -> &'static str {
        match self {
            Self::SaveThread { .. } => "save_thread",
            Self::PersistQuota { .. } => "persist_quota",
        }
    }
}

/// Runs effects against the store and quota sink
#[derive(Clone)]
pub struct EffectDispatcher {
    store: Arc<dyn ThreadStore>,
    quota_sink: Option<Arc<dyn QuotaSink>>,
}

impl EffectDispatcher {
    pub fn new(store: Arc<dyn ThreadStore>, quota_sink: Option<Arc<dyn QuotaSink>>) -> Self {
        Self { store, quota_sink }
    }

    /// Runs `effects` in order
    ///
    /// # Returns
    ///
    /// The number of effects that failed. Failures are logged, never raised.
    pub async fn dispatch(&self, effects: Vec<Effect>) -> usize {
        let mut failed = 0;
        for effect in effects {
            let name = effect.name();
            let result = match effect {
                Effect::SaveThread {
                    conversation_id,
                    thread,
                } => self.store.save_thread(&conversation_id, &thread).await,
                Effect::PersistQuota { user_id, remaining } => match &self.quota_sink {
                    Some(sink) => sink.persist_remaining(&user_id, remaining).await,
                    None => Ok(()),
                },
            };

            if let Err(e) = result {
                failed += 1;
                tracing::warn!(effect = name, "Non-critical effect failed: {:#}", e);
            }
        }
        failed
    }
}
