use berea_protocol::{Message, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `conversations` row. Field names match the remote schema columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A `conversation_messages` row. The `role` column holds the wire labels
/// `user` / `ai`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub role: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Row shape for an in-memory message. Boilerplate messages must be
    /// filtered out before this point.
    pub fn from_message(user_id: Uuid, conversation_id: Uuid, msg: &Message) -> Self {
        Self {
            id: msg.id,
            user_id,
            conversation_id,
            role: msg.sender,
            content: msg.content.clone(),
            created_at: msg.timestamp,
        }
    }

    /// Rebuild the in-memory shape. Continuation tokens are not stored
    /// remotely, so a loaded message never carries one.
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            content: self.content,
            sender: self.role,
            timestamp: self.created_at,
            continuation: None,
            boilerplate: false,
        }
    }
}

/// An app-level `users` row, keyed separately from the auth identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub auth_user_id: Uuid,
    pub email_address: String,
}
