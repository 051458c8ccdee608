mod local;
mod memory;
mod rest;
mod types;

pub use local::{DraftStore, LOCAL_USER_KEY};
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use types::{ConversationRecord, MessageRecord, UserRecord};

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// Remote conversation-store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("store rejected request ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid row: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Abstract interface to the hosted conversation store.
///
/// The live implementation speaks PostgREST over HTTP; tests and local
/// development use the in-memory one. All methods take `&self` and return
/// boxed futures so the trait stays object-safe behind
/// `Arc<dyn ConversationStore>`.
pub trait ConversationStore: Send + Sync + 'static {
    /// Create a conversation owned by `user_id`.
    fn create_conversation(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<ConversationRecord, StoreError>>;

    /// List a user's conversations, newest first.
    fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ConversationRecord>, StoreError>>;

    /// Full message list for a conversation, oldest first.
    fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<MessageRecord>, StoreError>>;

    /// Ids of the messages already persisted for a conversation.
    fn message_ids(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<Vec<Uuid>, StoreError>>;

    /// Upsert a batch of message rows, keyed on id. Re-sending a row must
    /// not produce a duplicate.
    fn upsert_messages(&self, rows: Vec<MessageRecord>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Delete a conversation and its messages.
    fn delete_conversation(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<(), StoreError>>;

    /// App-level user row for an auth identity, if provisioned.
    fn find_user(
        &self,
        auth_user_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<UserRecord>, StoreError>>;
}
