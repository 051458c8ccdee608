use std::path::Path;
use std::sync::Mutex;

use berea_protocol::Message;
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Key for rows written while signed out.
pub const LOCAL_USER_KEY: &str = "local";

/// SQLite-backed store for unsent input drafts and a snapshot of the active
/// conversation, so both survive process restarts.
///
/// Uses a `Mutex<Connection>` for thread-safe interior mutability.
/// The database is created/migrated on `open()`.
pub struct DraftStore {
    conn: Mutex<Connection>,
}

impl DraftStore {
    /// Open (or create) a sqlite database at the given path.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS drafts (
                user_key   TEXT PRIMARY KEY,
                content    TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                user_key        TEXT PRIMARY KEY,
                conversation_id TEXT,
                messages_json   TEXT NOT NULL,
                updated_at      INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| format!("migrate: {e}"))?;
        Ok(())
    }

    /// Persist the text sitting unsent in the input box.
    pub fn set_draft(&self, user: &str, content: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO drafts (user_key, content, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_key) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at",
            params![user, content, now_unix() as i64],
        )
        .map_err(|e| format!("set_draft: {e}"))?;
        Ok(())
    }

    pub fn draft(&self, user: &str) -> Result<Option<String>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT content FROM drafts WHERE user_key = ?1")
            .map_err(|e| format!("draft prepare: {e}"))?;

        let mut rows = stmt
            .query_map(params![user], |row| row.get::<_, String>(0))
            .map_err(|e| format!("draft query: {e}"))?;

        match rows.next() {
            Some(Ok(content)) => Ok(Some(content)),
            Some(Err(e)) => Err(format!("draft row: {e}")),
            None => Ok(None),
        }
    }

    pub fn clear_draft(&self, user: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute("DELETE FROM drafts WHERE user_key = ?1", params![user])
            .map_err(|e| format!("clear_draft: {e}"))?;
        Ok(())
    }

    /// Persist the active message list and conversation id.
    pub fn save_snapshot(
        &self,
        user: &str,
        conversation: Option<Uuid>,
        messages: &[Message],
    ) -> Result<(), String> {
        let messages_json =
            serde_json::to_string(messages).map_err(|e| format!("serialize snapshot: {e}"))?;
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute(
            "INSERT INTO snapshots (user_key, conversation_id, messages_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_key) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                messages_json = excluded.messages_json,
                updated_at = excluded.updated_at",
            params![
                user,
                conversation.map(|id| id.to_string()),
                messages_json,
                now_unix() as i64,
            ],
        )
        .map_err(|e| format!("save_snapshot: {e}"))?;
        Ok(())
    }

    /// Load the last persisted message list, if any.
    pub fn snapshot(&self, user: &str) -> Result<Option<(Option<Uuid>, Vec<Message>)>, String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT conversation_id, messages_json FROM snapshots WHERE user_key = ?1")
            .map_err(|e| format!("snapshot prepare: {e}"))?;

        let mut rows = stmt
            .query_map(params![user], |row| {
                let conversation: Option<String> = row.get(0)?;
                let messages_json: String = row.get(1)?;
                Ok((conversation, messages_json))
            })
            .map_err(|e| format!("snapshot query: {e}"))?;

        let (conversation, messages_json) = match rows.next() {
            Some(Ok(row)) => row,
            Some(Err(e)) => return Err(format!("snapshot row: {e}")),
            None => return Ok(None),
        };

        let conversation = conversation
            .map(|raw| raw.parse::<Uuid>())
            .transpose()
            .map_err(|e| format!("snapshot conversation id: {e}"))?;
        let messages: Vec<Message> =
            serde_json::from_str(&messages_json).map_err(|e| format!("parse snapshot: {e}"))?;
        Ok(Some((conversation, messages)))
    }

    /// Drop everything stored for a user. Runs after the final sign-out flush.
    pub fn clear_user(&self, user: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("lock: {e}"))?;
        conn.execute("DELETE FROM drafts WHERE user_key = ?1", params![user])
            .map_err(|e| format!("clear_user drafts: {e}"))?;
        conn.execute("DELETE FROM snapshots WHERE user_key = ?1", params![user])
            .map_err(|e| format!("clear_user snapshots: {e}"))?;
        Ok(())
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
