//! Reload of a single thread
//!
//! Reloading an answer deletes its persisted thread, removes the question
//! and answer from the conversation, and asks the same question again as a
//! fresh turn. The new pair takes the old pair's place in the
//! conversation, and a follow-up re-resolves its parent against the answers
//! before that place.
//!
//! A thread whose completion is still being saved is deleted only after the
//! save finishes, so the store never keeps the replaced thread.

use crate::session::message::QuestionKind;
use crate::session::{begin_resubmit, AskOutcome, Session, SessionEvent};

/// Result of [`Session::reload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing to reload
    Skipped,
    Resubmitted(AskOutcome),
}

impl Session {
    /// Destroys and re-asks the thread answered by `assistant_message_id`
    ///
    /// A store deletion failure is logged and the reload continues. If the
    /// thread is still streaming, its stream is superseded first.
    ///
    /// # Errors
    ///
    /// Never fails for stream or store problems; the `Result` is reserved
    /// for input errors shared with [`Session::ask`].
    pub async fn reload(&self, assistant_message_id: &str) -> crate::error::Result<ReloadOutcome> {
        let (target, pending_save) = {
            let mut core = self.lock();
            let Some(target) = core.state.reload_target(assistant_message_id) else {
                tracing::debug!(message_id = assistant_message_id, "Nothing to reload");
                return Ok(ReloadOutcome::Skipped);
            };
            if core
                .active
                .as_ref()
                .is_some_and(|active| active.assistant_id == assistant_message_id)
            {
                if let Some(active) = core.active.take() {
                    active.token.cancel();
                }
            }
            let pending_save = target
                .thread
                .resolved()
                .and_then(|id| core.pending_saves.get(id).cloned());
            (target, pending_save)
        };

        if let Some(mut saved) = pending_save {
            tracing::debug!(thread_id = %target.thread, "Waiting for thread save before reload");
            // A dropped sender means the save was abandoned.
            let _ = saved.wait_for(|done| *done).await;
        }

        if let Some(thread_id) = target.thread.resolved() {
            if let Err(e) = self
                .store
                .delete_thread(&self.identity.conversation_id, thread_id)
                .await
            {
                tracing::warn!(thread_id = %thread_id, "Failed to delete thread for reload: {:#}", e);
            }
        }

        let turn = {
            let mut core = self.lock();
            let Some(removed) = core.state.remove_turn(assistant_message_id) else {
                // Removed concurrently by another reload.
                return Ok(ReloadOutcome::Skipped);
            };
            begin_resubmit(&mut core, &removed)
        };

        tracing::info!(
            previous_thread = %target.thread,
            position = target.position,
            follow_up = turn.submission.kind == QuestionKind::FollowUp,
            "Reloading thread"
        );

        self.gate.record_question();
        self.emit(SessionEvent::MessagesChanged);

        Ok(ReloadOutcome::Resubmitted(self.drive(turn, false).await))
    }
}
