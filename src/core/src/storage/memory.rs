use std::collections::HashMap;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{ConversationRecord, MessageRecord, UserRecord};
use super::{ConversationStore, StoreError};

/// In-memory conversation store for tests and local development.
///
/// Counts write batches and rows so callers can assert exactly how much
/// work a sync pass performed, and can be flipped into a failing mode to
/// exercise retry paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Vec<UserRecord>,
    conversations: HashMap<Uuid, ConversationRecord>,
    messages: HashMap<Uuid, MessageRecord>,
    upsert_batches: usize,
    rows_written: usize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an app-level user row.
    pub async fn add_user(&self, user: UserRecord) {
        self.inner.lock().await.users.push(user);
    }

    /// Make subsequent write calls fail.
    pub async fn fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }

    /// How many upsert batches have been accepted.
    pub async fn upsert_batches(&self) -> usize {
        self.inner.lock().await.upsert_batches
    }

    /// How many rows those batches carried in total.
    pub async fn rows_written(&self) -> usize {
        self.inner.lock().await.rows_written
    }

    pub async fn conversation_count(&self) -> usize {
        self.inner.lock().await.conversations.len()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.lock().await.messages.len()
    }
}

impl ConversationStore for MemoryStore {
    fn create_conversation(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<ConversationRecord, StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.fail_writes {
                return Err(StoreError::Api {
                    status: 503,
                    body: "writes disabled".into(),
                });
            }
            let record = ConversationRecord {
                id: Uuid::new_v4(),
                user_id,
                created_at: Utc::now(),
            };
            inner.conversations.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ConversationRecord>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let mut conversations: Vec<_> = inner
                .conversations
                .values()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect();
            conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(conversations)
        })
    }

    fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<MessageRecord>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let mut messages: Vec<_> = inner
                .messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(messages)
        })
    }

    fn message_ids(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<Vec<Uuid>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .messages
                .values()
                .filter(|m| m.conversation_id == conversation_id)
                .map(|m| m.id)
                .collect())
        })
    }

    fn upsert_messages(&self, rows: Vec<MessageRecord>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if inner.fail_writes {
                return Err(StoreError::Api {
                    status: 503,
                    body: "writes disabled".into(),
                });
            }
            inner.upsert_batches += 1;
            inner.rows_written += rows.len();
            for row in rows {
                inner.messages.insert(row.id, row);
            }
            Ok(())
        })
    }

    fn delete_conversation(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.conversations.remove(&conversation_id);
            inner
                .messages
                .retain(|_, m| m.conversation_id != conversation_id);
            Ok(())
        })
    }

    fn find_user(
        &self,
        auth_user_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<UserRecord>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .users
                .iter()
                .find(|u| u.auth_user_id == auth_user_id)
                .cloned())
        })
    }
}
