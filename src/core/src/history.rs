use std::sync::Arc;

use berea_protocol::Message;
use uuid::Uuid;

use crate::auth::SessionWatch;
use crate::storage::{ConversationRecord, ConversationStore, StoreError};

/// Read side of past conversations: list them, open one, delete one.
///
/// Opening hands the full message list to the orchestrator, which runs the
/// switch protocol before adopting it. Deletion is the user's operation,
/// not the sync engine's; hosts switch away from a conversation before
/// deleting it.
pub struct HistoryLoader {
    store: Arc<dyn ConversationStore>,
    sessions: SessionWatch,
}

impl HistoryLoader {
    pub fn new(store: Arc<dyn ConversationStore>, sessions: SessionWatch) -> Self {
        Self { store, sessions }
    }

    /// The signed-in user's conversations, newest first.
    pub async fn list(&self) -> Result<Vec<ConversationRecord>, StoreError> {
        let user_id = self.user_id()?;
        self.store.list_conversations(user_id).await
    }

    /// Full message sequence for one conversation, oldest first.
    pub async fn open(&self, conversation: Uuid) -> Result<Vec<Message>, StoreError> {
        self.user_id()?;
        let rows = self.store.list_messages(conversation).await?;
        Ok(rows.into_iter().map(|row| row.into_message()).collect())
    }

    /// Remove a conversation and its messages.
    pub async fn delete(&self, conversation: Uuid) -> Result<(), StoreError> {
        self.user_id()?;
        self.store.delete_conversation(conversation).await
    }

    fn user_id(&self) -> Result<Uuid, StoreError> {
        self.sessions
            .borrow()
            .as_ref()
            .map(|session| session.identity.user_id)
            .ok_or(StoreError::NotSignedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSession, UserIdentity};
    use crate::storage::{MemoryStore, MessageRecord};
    use berea_protocol::Sender;
    use tokio::sync::watch;

    fn session_for(user_id: Uuid) -> (watch::Sender<Option<AuthSession>>, SessionWatch) {
        let session = AuthSession {
            identity: UserIdentity {
                user_id,
                auth_user_id: Uuid::new_v4(),
                email: "berean@example.com".into(),
            },
            access_token: "token".into(),
        };
        watch::channel(Some(session))
    }

    #[tokio::test]
    async fn signed_out_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (_tx, sessions) = watch::channel(None);
        let loader = HistoryLoader::new(store, sessions);

        assert!(matches!(loader.list().await, Err(StoreError::NotSignedIn)));
        assert!(matches!(
            loader.open(Uuid::new_v4()).await,
            Err(StoreError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn list_and_open_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let (_tx, sessions) = session_for(user_id);

        let conversation = store.create_conversation(user_id).await.unwrap();
        let message = Message::user("searching the scriptures");
        store
            .upsert_messages(vec![MessageRecord::from_message(
                user_id,
                conversation.id,
                &message,
            )])
            .await
            .unwrap();

        let loader = HistoryLoader::new(store, sessions);
        let listed = loader.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, conversation.id);

        let opened = loader.open(conversation.id).await.unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].id, message.id);
        assert_eq!(opened[0].sender, Sender::User);
        assert!(opened[0].continuation.is_none());
    }

    #[tokio::test]
    async fn delete_removes_conversation() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let (_tx, sessions) = session_for(user_id);

        let conversation = store.create_conversation(user_id).await.unwrap();
        let loader = HistoryLoader::new(store.clone(), sessions);

        loader.delete(conversation.id).await.unwrap();
        assert_eq!(store.conversation_count().await, 0);
    }
}
