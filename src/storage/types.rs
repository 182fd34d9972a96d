use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::citations::CitationMap;
use crate::feedback::{FeedbackKind, FeedbackRecord};

/// A persisted question/answer pair
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub thread_id: String,
    pub document: ThreadDocument,
}

impl Thread {
    pub fn new(thread_id: impl Into<String>, document: ThreadDocument) -> Self {
        Self {
            thread_id: thread_id.into(),
            document,
        }
    }

    /// Returns true when the thread has no parent
    pub fn is_root(&self) -> bool {
        self.document.context.parent_thread_id.is_none()
    }

    /// When the question was asked
    pub fn asked_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.document.user_message.timestamp)
    }
}

/// Stored thread document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDocument {
    pub user_message: StoredQuestion,
    pub bot_response: StoredAnswer,
    #[serde(default)]
    pub context: ThreadContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub content: String,
    #[serde(default)]
    pub citations: CitationMap,
    #[serde(default)]
    pub search_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_content: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadContext {
    pub parent_thread_id: Option<String>,
}

/// Stored feedback document; thread id and kind live in the key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDocument {
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub text_comment: String,
    /// RFC 3339
    pub timestamp: String,
}

impl From<&FeedbackRecord> for FeedbackDocument {
    fn from(record: &FeedbackRecord) -> Self {
        Self {
            options: record.options.clone(),
            text_comment: record.free_text.clone(),
            timestamp: record.timestamp.to_rfc3339(),
        }
    }
}

impl FeedbackDocument {
    /// Rebuilds the record stored under `thread_id`/`kind`
    ///
    /// An unparseable timestamp becomes the Unix epoch.
    pub fn into_record(self, thread_id: &str, kind: FeedbackKind) -> FeedbackRecord {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        FeedbackRecord {
            thread_id: thread_id.to_string(),
            kind,
            options: self.options,
            free_text: self.text_comment,
            timestamp,
        }
    }
}
