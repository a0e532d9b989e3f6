//! Durable conversation log.
//!
//! A conversation is an append-only list of messages. Each committed
//! [`Turn`](crate::turn::Turn) maps to one message through [`MessageRecord`],
//! and [`replay`] turns the stored messages back into an identical
//! [`History`](crate::turn::History) plus the transcript the user saw.

mod memory;
mod record;
mod sqlite;

pub use memory::MemoryConversationStore;
pub use record::{MessageRecord, Replay, replay};
pub use sqlite::SqliteConversationStore;

use crate::error::{StoreError, StoreResult};
use crate::turn::{JsonMap, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title of a conversation before its first message.
pub const DEFAULT_TITLE: &str = "Untitled Conversation";

/// Longest title kept verbatim.
pub const MAX_TITLE_CHARS: usize = 100;

/// Reject ids that are empty or could step outside their directory.
///
/// # Errors
///
/// Returns [`StoreError::InvalidId`].
pub fn check_id(id: &str) -> StoreResult<()> {
    let escapes = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0']);
    if escapes {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Title for a conversation started with `message`.
///
/// Titles longer than [`MAX_TITLE_CHARS`] keep 97 characters plus `...`.
#[must_use]
pub fn title_from_message(message: &str) -> String {
    let title = message.trim();
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        title.to_string()
    }
}

/// Persisted identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the latest message.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A conversation created now. An empty title becomes [`DEFAULT_TITLE`].
    #[must_use]
    pub fn new(project_id: impl Into<String>, id: impl Into<String>, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            title: if title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title.to_string()
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// One stored message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Row id, increasing in append order.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: String,
    /// Message type.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Structured extras (reasoning, tool calls, tool output, tokens).
    pub metadata: Option<JsonMap>,
    /// Append time.
    pub timestamp: DateTime<Utc>,
}

/// Storage of conversations for a project.
///
/// Implementations must return messages in append order.
#[async_trait]
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement the `ConversationStore` trait",
    label = "this type cannot persist conversations"
)]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation. An empty title becomes [`DEFAULT_TITLE`].
    async fn create_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<Conversation>;

    /// Load one conversation.
    async fn get_conversation(&self, project_id: &str, conversation_id: &str)
    -> StoreResult<Conversation>;

    /// All conversations of a project, most recently updated first.
    async fn list_conversations(&self, project_id: &str) -> StoreResult<Vec<Conversation>>;

    /// Append a message and bump `updated_at`.
    async fn save_message(
        &self,
        project_id: &str,
        conversation_id: &str,
        message: &MessageRecord,
    ) -> StoreResult<()>;

    /// Every message, in append order.
    async fn get_messages(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> StoreResult<Vec<StoredMessage>>;

    /// Rename a conversation.
    async fn update_title(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<()>;

    /// Delete a conversation and its messages. Deleting an unknown id is not an error.
    async fn delete_conversation(&self, project_id: &str, conversation_id: &str) -> StoreResult<()>;
}

/// Shared handle to a store.
pub type SharedConversationStore = std::sync::Arc<dyn ConversationStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_message() {
        assert_eq!(title_from_message("  list users "), "list users");
        assert_eq!(title_from_message(""), DEFAULT_TITLE);

        let long = "x".repeat(150);
        let title = title_from_message(&long);
        assert_eq!(title.chars().count(), 100);
        assert!(title.ends_with("..."));

        let exact = "y".repeat(100);
        assert_eq!(title_from_message(&exact), exact);
    }

    #[test]
    fn test_check_id() {
        assert!(check_id("3f2c9a10-conv").is_ok());
        assert!(check_id("release.v2").is_ok());
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b", "..hidden"] {
            assert!(matches!(check_id(bad), Err(StoreError::InvalidId(_))), "{bad}");
        }
    }

    #[test]
    fn test_new_conversation_default_title() {
        let conversation = Conversation::new("p1", "c1", "");
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert_eq!(conversation.created_at, conversation.updated_at);
    }
}
