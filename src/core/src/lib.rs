pub mod auth;
pub mod chat;
pub mod completion;
pub mod config;
pub mod history;
pub mod lifecycle;
pub mod paths;
pub mod storage;
pub mod sync;

pub use auth::{AuthApi, AuthContext, AuthError, AuthSession, RestAuth, SessionWatch, UserIdentity};
pub use chat::{ChatError, ChatSession, TurnState};
pub use completion::{CompletionBackend, CompletionError, HttpCompletion};
pub use config::BereaConfig;
pub use history::HistoryLoader;
pub use lifecycle::LifecycleSignal;
pub use storage::{ConversationStore, DraftStore, MemoryStore, RestStore, StoreError};
pub use sync::{spawn_sync_engine, SyncConfig, SyncHandle, SyncState};
