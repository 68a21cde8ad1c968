//! Conversation history store
//!
//! Append-only log shared by the session loop and background skills.
//! Writes are serialized through a single writer lock; reads go straight to
//! the pool.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use serde_json::{Map, Value};

use super::DbPool;
use crate::{Error, Result};

/// Free-form message annotations
pub type Metadata = Map<String, Value>;

/// A message in the conversation history
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Metadata>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Durable, thread-safe conversation log
#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
    writer: Arc<Mutex<()>>,
}

impl ConversationStore {
    /// Create a new conversation store
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Append a message; it is committed before this returns
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add(
        &self,
        role: MessageRole,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<ConversationMessage> {
        let _guard = self
            .writer
            .lock()
            .map_err(|e| Error::Database(e.to_string()))?;
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let timestamp = next_timestamp(&conn)?;
        let message = insert(&conn, role, content, metadata, timestamp)?;

        tracing::trace!(id = message.id, role = role.as_str(), "message stored");
        Ok(message)
    }

    /// Append a user message and the assistant reply as one transaction
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails (nothing is written)
    pub fn add_exchange(
        &self,
        user: &str,
        assistant: &str,
    ) -> Result<(ConversationMessage, ConversationMessage)> {
        let _guard = self
            .writer
            .lock()
            .map_err(|e| Error::Database(e.to_string()))?;
        let mut conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let tx = conn.transaction()?;
        let timestamp = next_timestamp(&tx)?;
        let asked = insert(&tx, MessageRole::User, user, None, timestamp)?;
        let answered = insert(&tx, MessageRole::Assistant, assistant, None, timestamp)?;
        tx.commit()?;

        tracing::debug!(user_id = asked.id, assistant_id = answered.id, "exchange stored");
        Ok((asked, answered))
    }

    /// The `limit` most recent messages, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_recent(&self, limit: usize) -> Result<Vec<ConversationMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, role, content, timestamp, metadata
             FROM messages ORDER BY id DESC LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let newest_first = stmt
            .query_map([limit], |row| {
                let role: String = row.get(1)?;
                let timestamp: String = row.get(3)?;
                let metadata: Option<String> = row.get(4)?;
                let id: i64 = row.get(0)?;
                Ok(ConversationMessage {
                    id,
                    role: parse_role(id, &role),
                    content: row.get(2)?,
                    timestamp: parse_datetime(&timestamp),
                    metadata: metadata.and_then(|m| parse_metadata(id, &m)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Reverse to get chronological order
        Ok(newest_first.into_iter().rev().collect())
    }

    /// Delete all history, returning the number of removed messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear(&self) -> Result<usize> {
        let _guard = self
            .writer
            .lock()
            .map_err(|e| Error::Database(e.to_string()))?;
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let removed = conn.execute("DELETE FROM messages", [])?;
        tracing::info!(removed, "conversation history cleared");
        Ok(removed)
    }

    /// Number of stored messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn len(&self) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether the history is empty
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Now, clamped so it never precedes the newest stored timestamp
///
/// Keeps timestamp order equal to insertion order across clock steps.
fn next_timestamp(conn: &rusqlite::Connection) -> Result<DateTime<Utc>> {
    let last: Option<String> = conn
        .query_row(
            "SELECT timestamp FROM messages ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let now = Utc::now();
    Ok(last
        .map(|s| parse_datetime(&s))
        .filter(|last| *last > now)
        .unwrap_or(now))
}

fn insert(
    conn: &rusqlite::Connection,
    role: MessageRole,
    content: &str,
    metadata: Option<Metadata>,
    timestamp: DateTime<Utc>,
) -> Result<ConversationMessage> {
    let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO messages (role, content, timestamp, metadata) VALUES (?1, ?2, ?3, ?4)",
        params![
            role.as_str(),
            content,
            format_datetime(timestamp),
            metadata_json
        ],
    )?;

    Ok(ConversationMessage {
        id: conn.last_insert_rowid(),
        role,
        content: content.to_string(),
        timestamp: parse_datetime(&format_datetime(timestamp)),
        metadata,
    })
}

/// Fixed-width UTC so text order matches time order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_role(id: i64, role: &str) -> MessageRole {
    MessageRole::parse(role).unwrap_or_else(|| {
        tracing::warn!(id, role = %role, "unknown message role, treating as user");
        MessageRole::User
    })
}

fn parse_metadata(id: i64, raw: &str) -> Option<Metadata> {
    serde_json::from_str(raw)
        .inspect_err(|e| tracing::warn!(id, error = %e, "unreadable message metadata, dropping it"))
        .ok()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> ConversationStore {
        ConversationStore::new(init_memory().unwrap())
    }

    #[test]
    fn test_add_then_newest() {
        let store = setup();
        store.add(MessageRole::User, "first", None).unwrap();
        let added = store.add(MessageRole::Assistant, "second", None).unwrap();

        let newest = store.get_recent(1).unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].id, added.id);
        assert_eq!(newest[0].content, "second");
    }

    #[test]
    fn test_recent_window_is_chronological() {
        let store = setup();
        for i in 0..20 {
            store.add(MessageRole::User, &format!("msg {i}"), None).unwrap();
        }

        let recent = store.get_recent(5).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 15", "msg 16", "msg 17", "msg 18", "msg 19"]);
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_content_and_metadata_roundtrip() {
        let store = setup();
        let content = "it's \"quoted\" — ünïcode\nnew line; DROP TABLE messages;";
        let mut meta = Metadata::new();
        meta.insert("skill".to_string(), Value::from("reminder"));
        meta.insert("confidence".to_string(), Value::from(0.9));

        store
            .add(MessageRole::System, content, Some(meta.clone()))
            .unwrap();

        let back = store.get_recent(1).unwrap().remove(0);
        assert_eq!(back.content, content);
        assert_eq!(back.role, MessageRole::System);
        assert_eq!(back.metadata, Some(meta));
    }

    #[test]
    fn test_mangled_row_is_read_as_plain_user_message() {
        let store = setup();
        let conn = store.pool.get().unwrap();
        conn.execute(
            "INSERT INTO messages (role, content, timestamp, metadata)
             VALUES ('robot', 'beep', ?1, 'not json')",
            [format_datetime(Utc::now())],
        )
        .unwrap();
        drop(conn);

        let back = store.get_recent(1).unwrap().remove(0);
        assert_eq!(back.role, MessageRole::User);
        assert_eq!(back.content, "beep");
        assert!(back.metadata.is_none());
    }

    #[test]
    fn test_exchange_and_clear() {
        let store = setup();
        store.add_exchange("hello", "hi there!").unwrap();

        let recent = store.get_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, MessageRole::User);
        assert_eq!(recent[1].role, MessageRole::Assistant);

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.is_empty().unwrap());
        assert!(store.get_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_limit() {
        let store = setup();
        store.add(MessageRole::User, "x", None).unwrap();
        assert!(store.get_recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(crate::db::init(dir.path().join("c.db")).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store
                            .add(MessageRole::User, &format!("{t}-{i}"), None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = store.get_recent(1000).unwrap();
        assert_eq!(all.len(), 100);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
