use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::feedback::{FeedbackKind, FeedbackRecord};
use crate::quota::QuotaSink;
use crate::storage::{sort_threads, FeedbackDocument, Thread, ThreadDocument, ThreadStore};

#[derive(Default)]
struct ConversationEntry {
    threads: HashMap<String, ThreadDocument>,
    feedback: HashMap<(String, FeedbackKind), FeedbackDocument>,
}

/// In-memory thread store for tests and embedding.
#[derive(Default)]
pub struct MemoryThreadStore {
    conversations: RwLock<HashMap<String, ConversationEntry>>,
    quota: RwLock<HashMap<String, u64>>,
}

impl MemoryThreadStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the threads stored for a conversation, unordered.
    pub async fn thread_ids(&self, conversation_id: &str) -> Vec<String> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(|entry| entry.threads.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn save_thread(&self, conversation_id: &str, thread: &Thread) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .threads
            .insert(thread.thread_id.clone(), thread.document.clone());
        Ok(())
    }

    async fn delete_thread(&self, conversation_id: &str, thread_id: &str) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        if let Some(entry) = conversations.get_mut(conversation_id) {
            entry.threads.remove(thread_id);
            entry.feedback.retain(|(id, _), _| id != thread_id);
        }
        Ok(())
    }

    async fn load_threads(&self, conversation_id: &str) -> Result<Vec<Thread>> {
        let conversations = self.conversations.read().await;
        let mut threads: Vec<Thread> = conversations
            .get(conversation_id)
            .map(|entry| {
                entry
                    .threads
                    .iter()
                    .map(|(id, doc)| Thread::new(id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        sort_threads(&mut threads);
        Ok(threads)
    }

    async fn save_feedback(&self, conversation_id: &str, feedback: &FeedbackRecord) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .feedback
            .insert(
                (feedback.thread_id.clone(), feedback.kind),
                FeedbackDocument::from(feedback),
            );
        Ok(())
    }

    async fn load_feedback(
        &self,
        conversation_id: &str,
        thread_id: &str,
    ) -> Result<Vec<FeedbackRecord>> {
        let conversations = self.conversations.read().await;
        let Some(entry) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .feedback
            .iter()
            .filter(|((id, _), _)| id == thread_id)
            .map(|((id, kind), doc)| doc.clone().into_record(id, *kind))
            .collect())
    }
}

#[async_trait]
impl QuotaSink for MemoryThreadStore {
    async fn persist_remaining(&self, user_id: &str, remaining: u64) -> Result<()> {
        self.quota.write().await.insert(user_id.to_string(), remaining);
        Ok(())
    }

    async fn load_remaining(&self, user_id: &str) -> Result<Option<u64>> {
        Ok(self.quota.read().await.get(user_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StoredAnswer, StoredQuestion, ThreadContext};

    fn thread(id: &str, timestamp: i64) -> Thread {
        Thread::new(
            id,
            ThreadDocument {
                user_message: StoredQuestion {
                    content: "q".into(),
                    timestamp,
                },
                bot_response: StoredAnswer::default(),
                context: ThreadContext::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let store = MemoryThreadStore::new();
        store.save_thread("c1", &thread("t2", 20)).await.unwrap();
        store.save_thread("c1", &thread("t1", 10)).await.unwrap();
        store.save_thread("c2", &thread("t3", 5)).await.unwrap();

        let ids: Vec<String> = store
            .load_threads("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.thread_id)
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert!(store.load_threads("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_drops_feedback() {
        let store = MemoryThreadStore::new();
        store.save_thread("c1", &thread("t1", 1)).await.unwrap();
        store
            .save_feedback("c1", &FeedbackRecord::new("t1", FeedbackKind::Helpful, vec![], ""))
            .await
            .unwrap();
        assert_eq!(store.load_feedback("c1", "t1").await.unwrap().len(), 1);

        store.delete_thread("c1", "t1").await.unwrap();
        assert!(store.thread_ids("c1").await.is_empty());
        assert!(store.load_feedback("c1", "t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_sink() {
        let store = MemoryThreadStore::new();
        store.persist_remaining("u1", 4).await.unwrap();
        assert_eq!(store.load_remaining("u1").await.unwrap(), Some(4));
        assert_eq!(store.load_remaining("u2").await.unwrap(), None);
    }
}
