//! Conversation state machine
//!
//! [`ConversationState`] owns the ordered message list of one session and
//! folds stream events into the in-flight assistant placeholder. It is
//! synchronous; the async [`Session`](crate::session::Session) drives it.
//!
//! Messages are appended, mutated in place, or replaced as a user/assistant
//! pair by reload. A reloaded pair is re-inserted where the old pair stood,
//! so the conversation order never changes.

use chrono::{DateTime, Utc};

use crate::citations::normalize;
use crate::error::{CliniqError, Result, StreamFailure};
use crate::session::message::{Answer, Message, QuestionKind, ThreadRef};
use crate::storage::{StoredAnswer, StoredQuestion, Thread, ThreadContext, ThreadDocument};
use crate::stream::{CompletionPayload, StatusPayload, StreamStatus};

/// Result of appending a question
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub user_message_id: String,
    pub assistant_message_id: String,
    pub thread: ThreadRef,
    pub parent_thread_id: Option<String>,
    pub kind: QuestionKind,
}

/// Result of a successful completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTurn {
    pub thread_id: String,
    /// Persistable form of the finished pair
    pub thread: Thread,
}

/// A user/assistant pair removed by reload
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTurn {
    pub question: String,
    pub kind: QuestionKind,
    pub thread: ThreadRef,
    /// Index of the user message in the conversation
    pub position: usize,
    pub asked_at: DateTime<Utc>,
}

/// Ordered messages of one conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Thread a follow-up submitted now would attach to
    pub fn last_answerable_thread(&self) -> Option<&str> {
        self.answered_before(self.messages.len())
    }

    /// Id of the last assistant message, if any
    pub fn last_assistant_id(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.id.as_str())
    }

    /// Appends a question and its placeholder answer
    ///
    /// A follow-up with no answerable thread becomes a root question.
    pub fn submit(&mut self, question: &str, follow_up: bool) -> Submission {
        self.insert_turn(self.messages.len(), question, follow_up, Utc::now())
    }

    /// Re-asks a removed question at the position it was removed from
    ///
    /// A follow-up attaches to the last answered thread before that
    /// position, not to the end of the conversation. The original question
    /// timestamp is kept so persisted threads load back in the same order.
    pub fn resubmit(&mut self, removed: &RemovedTurn) -> Submission {
        let position = removed.position.min(self.messages.len());
        self.insert_turn(
            position,
            &removed.question,
            removed.kind == QuestionKind::FollowUp,
            removed.asked_at,
        )
    }

    fn insert_turn(
        &mut self,
        position: usize,
        question: &str,
        follow_up: bool,
        asked_at: DateTime<Utc>,
    ) -> Submission {
        let parent_thread_id = if follow_up {
            self.answered_before(position).map(str::to_string)
        } else {
            None
        };
        let kind = if parent_thread_id.is_some() {
            QuestionKind::FollowUp
        } else {
            if follow_up {
                tracing::debug!("No answered thread to follow up on; asking as a new question");
            }
            QuestionKind::Main
        };

        let thread = ThreadRef::pending();
        let mut user = Message::user(question, thread.clone(), parent_thread_id.clone(), kind);
        user.timestamp = asked_at;
        let assistant = Message::placeholder(thread.clone(), parent_thread_id.clone(), kind);

        let submission = Submission {
            user_message_id: user.id.clone(),
            assistant_message_id: assistant.id.clone(),
            thread,
            parent_thread_id,
            kind,
        };

        self.messages.splice(position..position, [user, assistant]);
        submission
    }

    /// Appends streamed text to the placeholder
    pub fn apply_delta(&mut self, assistant_id: &str, text: &str) -> bool {
        match self.assistant_mut(assistant_id) {
            Some(message) => {
                message.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Updates the visible status; `complete_image` merges image content
    pub fn apply_status(
        &mut self,
        assistant_id: &str,
        status: StreamStatus,
        payload: Option<&StatusPayload>,
    ) -> bool {
        let Some(answer) = self.answer_mut(assistant_id) else {
            return false;
        };

        answer.status = status;
        if status == StreamStatus::CompleteImage {
            if let Some(payload) = payload {
                answer
                    .svg_content
                    .extend(payload.svg_content.iter().flatten().cloned());
            }
        }
        true
    }

    /// Finalizes the placeholder from the completion payload
    ///
    /// # Errors
    ///
    /// Returns `CliniqError::MissingThreadId` (leaving the state untouched)
    /// when the payload carries no thread id, and `CliniqError::Storage`
    /// when the placeholder no longer exists.
    pub fn apply_complete(
        &mut self,
        assistant_id: &str,
        payload: &CompletionPayload,
    ) -> Result<CompletedTurn> {
        let thread_id = payload
            .thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(CliniqError::MissingThreadId)?
            .to_string();

        let index = self
            .assistant_index(assistant_id)
            .ok_or_else(|| CliniqError::Storage(format!("Unknown message {}", assistant_id)))?;
        let pending = self.messages[index].thread.clone();
        let resolved = ThreadRef::Resolved(thread_id.clone());

        if let Some(user) = self.user_for(index) {
            if user.thread == pending {
                user.thread = resolved.clone();
            }
        }

        let assistant = &mut self.messages[index];
        assistant.thread = resolved;
        if !payload.processed_content.is_empty() {
            assistant.content = payload.processed_content.clone();
        }

        let answer = assistant.answer.get_or_insert_with(Answer::default);
        answer.status = StreamStatus::Complete;
        answer.citations = normalize(&payload.citations);
        if answer.svg_content.is_empty() {
            answer.svg_content = payload.svg_content.iter().flatten().cloned().collect();
        }
        answer.follow_up_questions = payload.questions_followed.clone();
        answer.metadata = payload.api_metadata.clone();
        answer.search_data = payload.search_data.clone();
        answer.failure = None;

        let thread = self.thread_record(index, &thread_id);

        Ok(CompletedTurn { thread_id, thread })
    }

    /// Replaces the placeholder content with a fallback text
    pub fn apply_failure(&mut self, assistant_id: &str, kind: StreamFailure, fallback: &str) -> bool {
        let Some(message) = self.assistant_mut(assistant_id) else {
            return false;
        };
        message.content = fallback.to_string();

        let answer = message.answer.get_or_insert_with(Answer::default);
        answer.status = StreamStatus::Complete;
        answer.failure = Some(kind);
        answer.upgrade_prompt = kind == StreamFailure::RateLimited;
        true
    }

    /// Marks a superseded placeholder as finished without an answer
    pub fn mark_interrupted(&mut self, assistant_id: &str) -> bool {
        let Some(answer) = self.answer_mut(assistant_id) else {
            return false;
        };
        if answer.is_loading() {
            answer.status = StreamStatus::Complete;
            answer.interrupted = true;
        }
        true
    }

    /// Finds the question a reload of `assistant_id` would resubmit
    ///
    /// `None` when the message is unknown, not an assistant message, or not
    /// directly preceded by a user message.
    pub fn reload_target(&self, assistant_id: &str) -> Option<RemovedTurn> {
        let index = self.assistant_index(assistant_id)?;
        let position = index.checked_sub(1)?;
        let user = &self.messages[position];
        if !user.is_user() {
            return None;
        }
        Some(RemovedTurn {
            question: user.content.clone(),
            kind: user.question_kind,
            thread: self.messages[index].thread.clone(),
            position,
            asked_at: user.timestamp,
        })
    }

    /// Removes an assistant message and the user message before it
    pub fn remove_turn(&mut self, assistant_id: &str) -> Option<RemovedTurn> {
        let removed = self.reload_target(assistant_id)?;
        self.messages.drain(removed.position..=removed.position + 1);
        Some(removed)
    }

    /// Replaces all messages with persisted threads, oldest first
    pub fn load(&mut self, threads: &[Thread]) {
        self.messages = threads
            .iter()
            .flat_map(|thread| {
                let (user, assistant) = Message::from_thread(thread);
                [user, assistant]
            })
            .collect();
    }

    /// Thread of the last answered assistant message before `position`
    fn answered_before(&self, position: usize) -> Option<&str> {
        self.messages[..position]
            .iter()
            .rev()
            .find(|m| m.is_answered())
            .and_then(|m| m.thread.resolved())
    }

    fn assistant_index(&self, id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id == id && m.is_assistant())
    }

    fn assistant_mut(&mut self, id: &str) -> Option<&mut Message> {
        let index = self.assistant_index(id)?;
        Some(&mut self.messages[index])
    }

    fn answer_mut(&mut self, id: &str) -> Option<&mut Answer> {
        self.assistant_mut(id)?.answer.as_mut()
    }

    fn user_for(&mut self, assistant_index: usize) -> Option<&mut Message> {
        let index = assistant_index.checked_sub(1)?;
        self.messages.get_mut(index).filter(|m| m.is_user())
    }

    fn thread_record(&self, assistant_index: usize, thread_id: &str) -> Thread {
        let assistant = &self.messages[assistant_index];
        let (question, asked_at) = assistant_index
            .checked_sub(1)
            .map(|i| &self.messages[i])
            .filter(|m| m.is_user())
            .map(|m| (m.content.clone(), m.timestamp))
            .unwrap_or_else(|| (String::new(), Utc::now()));
        let answer = assistant.answer.clone().unwrap_or_default();

        Thread::new(
            thread_id,
            ThreadDocument {
                user_message: StoredQuestion {
                    content: question,
                    timestamp: asked_at.timestamp_millis(),
                },
                bot_response: StoredAnswer {
                    content: assistant.content.clone(),
                    citations: answer.citations,
                    search_data: answer.search_data,
                    svg_content: Some(answer.svg_content).filter(|svg| !svg.is_empty()),
                },
                context: ThreadContext {
                    parent_thread_id: assistant.parent_thread_id.clone(),
                },
            },
        )
    }
}
