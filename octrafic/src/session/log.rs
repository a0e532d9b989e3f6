use crate::conversation::{
    DEFAULT_TITLE, MessageRecord, SharedConversationStore, title_from_message,
};
use crate::error::{StoreError, StoreResult};
use crate::transcript::TranscriptLine;
use crate::turn::{Role, Turn};
use tracing::{debug, warn};

/// Shown once when the log stops accepting writes.
pub(super) const DEGRADED_WARNING: &str =
    "⚠ Conversation log unavailable, continuing without persistence";

/// A session's binding to its durable conversation.
pub(super) struct ConversationLog {
    store: SharedConversationStore,
    project_id: String,
    conversation_id: String,
    created: bool,
    degraded: bool,
}

impl std::fmt::Debug for ConversationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLog")
            .field("project_id", &self.project_id)
            .field("conversation_id", &self.conversation_id)
            .field("created", &self.created)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

impl ConversationLog {
    pub(super) fn new(
        store: SharedConversationStore,
        project_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            project_id: project_id.into(),
            conversation_id: conversation_id.into(),
            created: false,
            degraded: false,
        }
    }

    pub(super) fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub(super) fn project_id(&self) -> &str {
        &self.project_id
    }

    pub(super) fn store(&self) -> &SharedConversationStore {
        &self.store
    }

    pub(super) const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Point the binding at another conversation.
    pub(super) fn rebind(&mut self, conversation_id: impl Into<String>, exists: bool) {
        self.conversation_id = conversation_id.into();
        self.created = exists;
    }

    /// Append one committed turn. Returns the warning to show when the log
    /// fails for the first time; afterwards writes are skipped.
    pub(super) async fn append(&mut self, turn: &Turn) -> Option<TranscriptLine> {
        if self.degraded {
            return None;
        }
        let mut result = self.try_append(turn).await;
        if let Err(e) = &result
            && e.is_retryable()
        {
            debug!(conversation = %self.conversation_id, error = %e, "retrying conversation write");
            result = self.try_append(turn).await;
        }
        match result {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    conversation = %self.conversation_id,
                    error = %e,
                    "conversation log failed, continuing in memory"
                );
                self.degraded = true;
                Some(TranscriptLine::warning(DEGRADED_WARNING))
            }
        }
    }

    async fn try_append(&mut self, turn: &Turn) -> StoreResult<()> {
        if !self.created {
            let title = if turn.role == Role::User {
                title_from_message(&turn.content)
            } else {
                DEFAULT_TITLE.to_string()
            };
            match self
                .store
                .get_conversation(&self.project_id, &self.conversation_id)
                .await
            {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => {
                    self.store
                        .create_conversation(&self.project_id, &self.conversation_id, &title)
                        .await?;
                }
                Err(e) => return Err(e),
            }
            self.created = true;
        }
        let record = MessageRecord::from_turn(turn)?;
        self.store
            .save_message(&self.project_id, &self.conversation_id, &record)
            .await?;
        debug!(conversation = %self.conversation_id, role = %turn.role, "turn persisted");
        Ok(())
    }
}
