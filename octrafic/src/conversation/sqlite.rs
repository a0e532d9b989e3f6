//! One `SQLite` database per conversation.
//!
//! Files live at `<data dir>/projects/<project>/conversations/<id>.db`.
//! `rusqlite` is blocking, so every call runs on the blocking pool.

use super::{Conversation, ConversationStore, MessageRecord, StoredMessage, check_id};
use crate::config::ProjectPaths;
use crate::error::{StoreError, StoreResult};
use crate::turn::{JsonMap, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversation (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversation(id)
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
";

const DB_EXTENSION: &str = "db";

/// File-backed conversation store.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    data_dir: PathBuf,
}

impl SqliteConversationStore {
    /// Store rooted at the application data directory.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn dir(&self, project_id: &str) -> StoreResult<PathBuf> {
        check_id(project_id)?;
        Ok(ProjectPaths::new(&self.data_dir, project_id).conversations_dir())
    }

    /// Database file of a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] when either id could leave the
    /// conversations directory.
    pub fn db_path(&self, project_id: &str, conversation_id: &str) -> StoreResult<PathBuf> {
        check_id(conversation_id)?;
        Ok(self
            .dir(project_id)?
            .join(format!("{conversation_id}.{DB_EXTENSION}")))
    }
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn open(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn open_existing(path: &Path, conversation_id: &str) -> StoreResult<Connection> {
    if !path.exists() {
        return Err(StoreError::NotFound(conversation_id.to_string()));
    }
    open(path)
}

fn parse_time(conversation_id: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(conversation_id, format!("bad timestamp {raw}: {e}")))
}

fn parse_role(conversation_id: &str, raw: &str) -> StoreResult<Role> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(StoreError::corrupt(
            conversation_id,
            format!("unknown message type {other}"),
        )),
    }
}

fn load_conversation(path: &Path, conversation_id: &str) -> StoreResult<Conversation> {
    let conn = open_existing(path, conversation_id)?;
    let row = conn
        .query_row(
            "SELECT id, project_id, title, created_at, updated_at FROM conversation WHERE id = ?1",
            params![conversation_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    let (id, project_id, title, created_at, updated_at) =
        row.ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
    Ok(Conversation {
        created_at: parse_time(&id, &created_at)?,
        updated_at: parse_time(&id, &updated_at)?,
        id,
        project_id,
        title,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<Conversation> {
        let dir = self.dir(project_id)?;
        let path = self.db_path(project_id, conversation_id)?;
        let conversation = Conversation::new(project_id, conversation_id, title);
        let record = conversation.clone();
        blocking(move || {
            std::fs::create_dir_all(&dir)?;
            let conn = open(&path)?;
            conn.execute(
                "INSERT INTO conversation (id, project_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.project_id,
                    record.title,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;
        info!(project = project_id, conversation = conversation_id, "conversation created");
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> StoreResult<Conversation> {
        let path = self.db_path(project_id, conversation_id)?;
        let id = conversation_id.to_string();
        blocking(move || load_conversation(&path, &id)).await
    }

    async fn list_conversations(&self, project_id: &str) -> StoreResult<Vec<Conversation>> {
        let dir = self.dir(project_id)?;
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut conversations = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match load_conversation(&path, id) {
                    Ok(conversation) => conversations.push(conversation),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable conversation"),
                }
            }
            conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(conversations)
        })
        .await
    }

    async fn save_message(
        &self,
        project_id: &str,
        conversation_id: &str,
        message: &MessageRecord,
    ) -> StoreResult<()> {
        let path = self.db_path(project_id, conversation_id)?;
        let id = conversation_id.to_string();
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let role = message.role.as_str();
        let content = message.content.clone();
        blocking(move || {
            let conn = open_existing(&path, &id)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages (conversation_id, type, content, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, role, content, metadata, now],
            )?;
            conn.execute(
                "UPDATE conversation SET updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
        .await?;
        debug!(conversation = conversation_id, role, "message saved");
        Ok(())
    }

    async fn get_messages(
        &self,
        project_id: &str,
        conversation_id: &str,
    ) -> StoreResult<Vec<StoredMessage>> {
        let path = self.db_path(project_id, conversation_id)?;
        let id = conversation_id.to_string();
        blocking(move || {
            let conn = open_existing(&path, &id)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, type, content, metadata, timestamp
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, String>(5)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (row_id, conversation_id, kind, content, metadata, timestamp) = row?;
                let metadata = metadata
                    .map(|raw| serde_json::from_str::<JsonMap>(&raw))
                    .transpose()?;
                messages.push(StoredMessage {
                    id: row_id,
                    role: parse_role(&id, &kind)?,
                    timestamp: parse_time(&id, &timestamp)?,
                    conversation_id,
                    content,
                    metadata,
                });
            }
            Ok(messages)
        })
        .await
    }

    async fn update_title(
        &self,
        project_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<()> {
        let path = self.db_path(project_id, conversation_id)?;
        let id = conversation_id.to_string();
        let title = title.to_string();
        blocking(move || {
            let conn = open_existing(&path, &id)?;
            let changed = conn.execute(
                "UPDATE conversation SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, Utc::now().to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_conversation(&self, project_id: &str, conversation_id: &str) -> StoreResult<()> {
        let path = self.db_path(project_id, conversation_id)?;
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await?;
        info!(project = project_id, conversation = conversation_id, "conversation deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::conversation::{DEFAULT_TITLE, replay};
    use crate::turn::{ToolCall, ToolResponse, Turn};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path());

        let created = store.create_conversation("p1", "c1", "").await.unwrap();
        assert_eq!(created.title, DEFAULT_TITLE);
        assert!(store.db_path("p1", "c1").unwrap().exists());

        let loaded = store.get_conversation("p1", "c1").await.unwrap();
        assert_eq!(loaded.id, "c1");
        assert_eq!(loaded.project_id, "p1");
        assert_eq!(loaded.created_at, created.created_at);

        let missing = store.get_conversation("p1", "nope").await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_messages_round_trip_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path());
        store.create_conversation("p1", "c1", "ping it").await.unwrap();

        let call = ToolCall::new("call_1", "ExecuteTest", json!({"method": "GET", "endpoint": "/ping"}).as_object().cloned().unwrap());
        let turns = vec![
            Turn::user("ping it"),
            Turn::assistant("").with_tool_calls(vec![call.clone()]).with_usage(50, 5),
            Turn::tool(ToolResponse::for_call(&call, json!({"passed": true, "status_code": 200}))),
            Turn::assistant("It answered 200."),
        ];
        for turn in &turns {
            let record = MessageRecord::from_turn(turn).unwrap();
            store.save_message("p1", "c1", &record).await.unwrap();
        }

        let messages = store.get_messages("p1", "c1").await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(messages[2].content, "Tool: ExecuteTest");

        let replayed = replay("c1", &messages).unwrap();
        assert_eq!(replayed.history.turns(), turns.as_slice());
    }

    #[tokio::test]
    async fn test_save_requires_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path());
        let record = MessageRecord::from_turn(&Turn::user("hi")).unwrap();
        let err = store.save_message("p1", "ghost", &record).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_sorts_and_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path());
        store.create_conversation("p1", "old", "first").await.unwrap();
        store.create_conversation("p1", "new", "second").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let record = MessageRecord::from_turn(&Turn::user("bump")).unwrap();
        store.save_message("p1", "old", &record).await.unwrap();

        std::fs::write(store.db_path("p1", "broken").unwrap(), b"not a database").unwrap();
        std::fs::write(store.dir("p1").unwrap().join("notes.txt"), b"ignored").unwrap();

        let listed = store.list_conversations("p1").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);

        assert!(store.list_conversations("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_title_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path());
        store.create_conversation("p1", "c1", "").await.unwrap();

        store.update_title("p1", "c1", "users API").await.unwrap();
        assert_eq!(store.get_conversation("p1", "c1").await.unwrap().title, "users API");

        store.delete_conversation("p1", "c1").await.unwrap();
        assert!(!store.db_path("p1", "c1").unwrap().exists());
        store.delete_conversation("p1", "c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_cannot_leave_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteConversationStore::new(dir.path().join("data"));

        for id in ["../x", "a/b", "..", "a\\b", ""] {
            let err = store.create_conversation("p1", id, "").await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidId(_)), "{id}: {err}");
        }
        assert!(matches!(
            store.get_messages("../p1", "c1").await.unwrap_err(),
            StoreError::InvalidId(_)
        ));
        assert!(!dir.path().join("data/projects/p1/x.db").exists());
        assert!(store.create_conversation("p1", "conv-1.v2", "").await.is_ok());
    }
}
