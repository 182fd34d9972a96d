//! Messages of a conversation session

use chrono::{DateTime, Utc};
use serde_json::Value;
use ulid::Ulid;

use crate::citations::CitationMap;
use crate::error::StreamFailure;
use crate::storage::Thread;
use crate::stream::StreamStatus;

const TEMP_PREFIX: &str = "temp-";

/// Thread identity of a message pair
///
/// A submission starts `Pending` with a locally generated temporary id and
/// becomes `Resolved` when the generation service assigns the real id.
/// Pending ids are never sent to the service or the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreadRef {
    Pending(String),
    Resolved(String),
}

impl ThreadRef {
    /// Allocates a fresh temporary id
    pub fn pending() -> Self {
        Self::Pending(format!("{}{}", TEMP_PREFIX, Ulid::new()))
    }

    /// Returns true for ids allocated by [`ThreadRef::pending`]
    pub fn is_temporary(id: &str) -> bool {
        id.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending(id) | Self::Resolved(id) => id,
        }
    }

    /// The server-assigned id, if resolved
    pub fn resolved(&self) -> Option<&str> {
        match self {
            Self::Resolved(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl std::fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Whether a question starts a new thread or continues one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Main,
    FollowUp,
}

/// Structured answer attached to an assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub status: StreamStatus,
    pub citations: CitationMap,
    pub svg_content: Vec<String>,
    pub follow_up_questions: Vec<String>,
    /// Diagnostic metadata reported by the service
    pub metadata: Option<Value>,
    pub search_data: Value,
    /// Set when the content is a fallback text
    pub failure: Option<StreamFailure>,
    /// Show the upgrade call-to-action
    pub upgrade_prompt: bool,
    /// The stream was superseded before it finished
    pub interrupted: bool,
}

impl Default for Answer {
    fn default() -> Self {
        Self {
            status: StreamStatus::Processing,
            citations: CitationMap::new(),
            svg_content: Vec::new(),
            follow_up_questions: Vec::new(),
            metadata: None,
            search_data: Value::Null,
            failure: None,
            upgrade_prompt: false,
            interrupted: false,
        }
    }
}

impl Answer {
    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub thread: ThreadRef,
    /// Parent thread sent with the request; `None` for root questions
    pub parent_thread_id: Option<String>,
    pub question_kind: QuestionKind,
    /// Present on assistant messages only
    pub answer: Option<Answer>,
}

impl Message {
    pub fn user(
        content: impl Into<String>,
        thread: ThreadRef,
        parent_thread_id: Option<String>,
        question_kind: QuestionKind,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            thread,
            parent_thread_id,
            question_kind,
            answer: None,
        }
    }

    /// Empty assistant message awaiting a stream
    pub fn placeholder(
        thread: ThreadRef,
        parent_thread_id: Option<String>,
        question_kind: QuestionKind,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            thread,
            parent_thread_id,
            question_kind,
            answer: Some(Answer::default()),
        }
    }

    /// Rebuilds the user/assistant pair of a persisted thread
    pub fn from_thread(thread: &Thread) -> (Self, Self) {
        let doc = &thread.document;
        let parent = doc.context.parent_thread_id.clone();
        let kind = if parent.is_some() {
            QuestionKind::FollowUp
        } else {
            QuestionKind::Main
        };
        let timestamp = thread.asked_at().unwrap_or_else(Utc::now);
        let thread_ref = ThreadRef::Resolved(thread.thread_id.clone());

        let mut user = Self::user(
            doc.user_message.content.clone(),
            thread_ref.clone(),
            parent.clone(),
            kind,
        );
        user.timestamp = timestamp;

        let mut assistant = Self::placeholder(thread_ref, parent, kind);
        assistant.content = doc.bot_response.content.clone();
        assistant.timestamp = timestamp;
        assistant.answer = Some(Answer {
            status: StreamStatus::Complete,
            citations: doc.bot_response.citations.clone(),
            svg_content: doc.bot_response.svg_content.clone().unwrap_or_default(),
            search_data: doc.bot_response.search_data.clone(),
            ..Answer::default()
        });

        (user, assistant)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Returns true for a finished, non-fallback assistant answer
    pub fn is_answered(&self) -> bool {
        self.is_assistant()
            && !self.thread.is_pending()
            && self
                .answer
                .as_ref()
                .is_some_and(|a| !a.is_loading() && a.failure.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::normalize;
    use crate::storage::{StoredAnswer, StoredQuestion, ThreadContext, ThreadDocument};
    use serde_json::json;

    #[test]
    fn test_pending_ids_are_temporary() {
        let pending = ThreadRef::pending();
        assert!(pending.is_pending());
        assert!(ThreadRef::is_temporary(pending.as_str()));
        assert!(pending.resolved().is_none());
        assert_ne!(pending, ThreadRef::pending());
        assert!(!ThreadRef::is_temporary("t1"));
    }

    #[test]
    fn test_placeholder_starts_loading() {
        let message = Message::placeholder(ThreadRef::pending(), None, QuestionKind::Main);
        assert!(message.is_assistant());
        assert!(message.content.is_empty());
        assert!(message.answer.as_ref().unwrap().is_loading());
        assert!(!message.is_answered());
    }

    #[test]
    fn test_from_thread_rebuilds_pair() {
        let thread = Thread::new(
            "t2",
            ThreadDocument {
                user_message: StoredQuestion {
                    content: "What about in pregnancy?".into(),
                    timestamp: 1_700_000_000_000,
                },
                bot_response: StoredAnswer {
                    content: "Labetalol is preferred.".into(),
                    citations: normalize(&json!({"1": {"title": "Guideline A", "sourceType": "guideline"}})),
                    search_data: json!({}),
                    svg_content: Some(vec!["<svg/>".into()]),
                },
                context: ThreadContext {
                    parent_thread_id: Some("t1".into()),
                },
            },
        );

        let (user, assistant) = Message::from_thread(&thread);
        assert_eq!(user.question_kind, QuestionKind::FollowUp);
        assert_eq!(user.thread, ThreadRef::Resolved("t2".into()));
        assert_eq!(assistant.parent_thread_id.as_deref(), Some("t1"));
        assert!(assistant.is_answered());
        let answer = assistant.answer.unwrap();
        assert_eq!(answer.citations.visible_count(), 1);
        assert_eq!(answer.svg_content, vec!["<svg/>"]);
        assert_eq!(user.timestamp.timestamp(), 1_700_000_000);
    }
}
