use super::{Conversation, ConversationStore, MessageRecord, StoredMessage};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    conversation: Conversation,
    messages: Vec<StoredMessage>,
}

/// In-memory conversation store.
///
/// Fast but not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    entries: RwLock<HashMap<(String, String), Entry>>,
}

impl MemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(project_id: &str, conversation_id: &str) -> (String, String) {
    (project_id.to_string(), conversation_id.to_string())
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<Conversation> {
        let mut entries = self.entries.write().await;
        let k = key(project_id, conversation_id);
        if entries.contains_key(&k) {
            return Err(StoreError::storage(
                "memory",
                format!("conversation {conversation_id} already exists"),
            ));
        }
        let conversation = Conversation::new(project_id, conversation_id, title);
        entries.insert(
            k,
            Entry {
                conversation: conversation.clone(),
                messages: Vec::new(),
            },
        );
        debug!(conversation = conversation_id, "conversation created in memory");
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> StoreResult<Conversation> {
        self.entries
            .read()
            .await
            .get(&key(project_id, conversation_id))
            .map(|e| e.conversation.clone())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn list_conversations(&self, project_id: &str) -> StoreResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|((project, _), _)| project == project_id)
            .map(|(_, e)| e.conversation.clone())
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn save_message(
        &self,
        project_id: &str,
        conversation_id: &str,
        message: &MessageRecord,
    ) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&key(project_id, conversation_id))
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        let now = Utc::now();
        let id = i64::try_from(entry.messages.len()).unwrap_or(i64::MAX - 1) + 1;
        entry.messages.push(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            metadata: message.metadata.clone(),
            timestamp: now,
        });
        entry.conversation.updated_at = now;
        Ok(())
    }

    async fn get_messages(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> StoreResult<Vec<StoredMessage>> {
        self.entries
            .read()
            .await
            .get(&key(project_id, conversation_id))
            .map(|e| e.messages.clone())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn update_title(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&key(project_id, conversation_id))
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        title.clone_into(&mut entry.conversation.title);
        entry.conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_conversation(&self, project_id: &str, conversation_id: &str) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .remove(&key(project_id, conversation_id));
        Ok(())
    }
}
