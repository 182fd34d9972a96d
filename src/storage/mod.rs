//! Persisted thread storage
//!
//! [`ThreadStore`] is the read/write contract the conversation engine uses
//! for threads and feedback. Two implementations ship with the crate:
//!
//! - [`SledThreadStore`] -- embedded `sled` database, also a [`QuotaSink`]
//! - [`MemoryThreadStore`] -- in-process maps for tests and embedding
//!
//! Keys are scoped by conversation id; one conversation never sees another's
//! threads.
//!
//! [`QuotaSink`]: crate::quota::QuotaSink

pub mod memory;
pub mod sled_store;
pub mod types;

pub use memory::MemoryThreadStore;
pub use sled_store::SledThreadStore;
pub use types::{
    FeedbackDocument, StoredAnswer, StoredQuestion, Thread, ThreadContext, ThreadDocument,
};

use crate::error::Result;
use crate::feedback::FeedbackRecord;

/// Read/write contract for persisted threads and feedback
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    /// Writes `thread`, replacing any thread with the same id
    async fn save_thread(&self, conversation_id: &str, thread: &Thread) -> Result<()>;

    /// Deletes a thread; deleting a missing thread succeeds
    async fn delete_thread(&self, conversation_id: &str, thread_id: &str) -> Result<()>;

    /// Loads every thread of a conversation ordered by question timestamp
    async fn load_threads(&self, conversation_id: &str) -> Result<Vec<Thread>>;

    /// Writes feedback, overwriting an earlier record of the same kind
    async fn save_feedback(&self, conversation_id: &str, feedback: &FeedbackRecord) -> Result<()>;

    /// Loads all feedback recorded for a thread
    async fn load_feedback(
        &self,
        conversation_id: &str,
        thread_id: &str,
    ) -> Result<Vec<FeedbackRecord>>;
}

/// Sorts threads by question timestamp, then id for a stable order
pub(crate) fn sort_threads(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        a.document
            .user_message
            .timestamp
            .cmp(&b.document.user_message.timestamp)
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    });
}
