//! Embedded `sled` thread store
//!
//! Layout (values are JSON):
//!
//! ```text
//! threads/{conversation_id}/{thread_id}           -> ThreadDocument
//! feedback/{conversation_id}/{thread_id}/{kind}   -> FeedbackDocument
//! quota/{user_id}                                 -> u64
//! ```

use std::path::Path;

use sled::Db;

use crate::error::{CliniqError, Result};
use crate::feedback::{FeedbackKind, FeedbackRecord};
use crate::quota::QuotaSink;
use crate::storage::{sort_threads, FeedbackDocument, Thread, ThreadDocument, ThreadStore};

/// Thread store backed by an embedded `sled` database
///
/// # Examples
///
/// ```
/// use cliniq::storage::SledThreadStore;
///
/// # fn main() -> cliniq::error::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let store = SledThreadStore::new(dir.path().join("threads.db"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SledThreadStore {
    db: Db,
}

impl SledThreadStore {
    /// Open or create a store at `path`
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::Storage` if the database cannot be opened
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)
            .map_err(|e| CliniqError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Lists the ids of conversations that have at least one thread
    pub fn conversations(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for item in self.db.scan_prefix(b"threads/") {
            let (key, _) =
                item.map_err(|e| CliniqError::Storage(format!("Iteration failed: {}", e)))?;
            let key = String::from_utf8_lossy(&key);
            if let Some(conversation) = key.trim_start_matches("threads/").split('/').next() {
                if ids.last().map(String::as_str) != Some(conversation) {
                    ids.push(conversation.to_string());
                }
            }
        }
        Ok(ids)
    }

    fn put<T: serde::Serialize>(&self, key: String, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| CliniqError::Storage(format!("Serialization failed: {}", e)))?;

        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| CliniqError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| CliniqError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}

fn thread_key(conversation_id: &str, thread_id: &str) -> String {
    format!("threads/{}/{}", conversation_id, thread_id)
}

fn feedback_prefix(conversation_id: &str, thread_id: &str) -> String {
    format!("feedback/{}/{}/", conversation_id, thread_id)
}

#[async_trait::async_trait]
impl ThreadStore for SledThreadStore {
    async fn save_thread(&self, conversation_id: &str, thread: &Thread) -> Result<()> {
        self.put(thread_key(conversation_id, &thread.thread_id), &thread.document)?;
        tracing::debug!(conversation_id, thread_id = %thread.thread_id, "Thread saved");
        Ok(())
    }

    async fn delete_thread(&self, conversation_id: &str, thread_id: &str) -> Result<()> {
        self.db
            .remove(thread_key(conversation_id, thread_id).as_bytes())
            .map_err(|e| CliniqError::Storage(format!("Delete failed: {}", e)))?;

        for item in self.db.scan_prefix(feedback_prefix(conversation_id, thread_id).as_bytes()) {
            let (key, _) =
                item.map_err(|e| CliniqError::Storage(format!("Iteration failed: {}", e)))?;
            self.db
                .remove(key)
                .map_err(|e| CliniqError::Storage(format!("Delete failed: {}", e)))?;
        }

        self.db
            .flush()
            .map_err(|e| CliniqError::Storage(format!("Flush failed: {}", e)))?;

        tracing::debug!(conversation_id, thread_id, "Thread deleted");
        Ok(())
    }

    async fn load_threads(&self, conversation_id: &str) -> Result<Vec<Thread>> {
        let prefix = format!("threads/{}/", conversation_id);
        let mut threads = Vec::new();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|e| CliniqError::Storage(format!("Iteration failed: {}", e)))?;
            let key = String::from_utf8_lossy(&key);
            let thread_id = key.trim_start_matches(prefix.as_str()).to_string();

            match serde_json::from_slice::<ThreadDocument>(&value) {
                Ok(document) => threads.push(Thread::new(thread_id, document)),
                Err(e) => {
                    tracing::warn!(conversation_id, %thread_id, "Skipping unreadable thread: {}", e);
                }
            }
        }

        sort_threads(&mut threads);
        Ok(threads)
    }

    async fn save_feedback(&self, conversation_id: &str, feedback: &FeedbackRecord) -> Result<()> {
        let key = format!(
            "{}{}",
            feedback_prefix(conversation_id, &feedback.thread_id),
            feedback.kind
        );
        self.put(key, &FeedbackDocument::from(feedback))
    }

    async fn load_feedback(
        &self,
        conversation_id: &str,
        thread_id: &str,
    ) -> Result<Vec<FeedbackRecord>> {
        let prefix = feedback_prefix(conversation_id, thread_id);
        let mut records = Vec::new();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) =
                item.map_err(|e| CliniqError::Storage(format!("Iteration failed: {}", e)))?;
            let key = String::from_utf8_lossy(&key);
            let Some(kind) = FeedbackKind::parse(key.trim_start_matches(prefix.as_str())) else {
                continue;
            };
            let document: FeedbackDocument = serde_json::from_slice(&value)
                .map_err(|e| CliniqError::Storage(format!("Deserialization failed: {}", e)))?;
            records.push(document.into_record(thread_id, kind));
        }

        Ok(records)
    }
}

#[async_trait::async_trait]
impl QuotaSink for SledThreadStore {
    async fn persist_remaining(&self, user_id: &str, remaining: u64) -> Result<()> {
        self.put(format!("quota/{}", user_id), &remaining)
    }

    async fn load_remaining(&self, user_id: &str) -> Result<Option<u64>> {
        match self
            .db
            .get(format!("quota/{}", user_id).as_bytes())
            .map_err(|e| CliniqError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let remaining = serde_json::from_slice(&bytes)
                    .map_err(|e| CliniqError::Storage(format!("Deserialization failed: {}", e)))?;
                Ok(Some(remaining))
            }
            None => Ok(None),
        }
    }
}
