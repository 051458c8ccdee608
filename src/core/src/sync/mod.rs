mod engine;

pub use engine::spawn_sync_engine;

use std::time::Duration;

use berea_protocol::Message;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::lifecycle::LifecycleSignal;

/// Engine state as observable from outside. There is no error state:
/// failed passes log, leave their messages unsynced, and return to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Collapse window between a message-list change and the sync pass it
    /// schedules. Edits inside the window re-arm the same deadline.
    pub debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
        }
    }
}

pub(crate) enum Command {
    MessagesChanged {
        messages: Vec<Message>,
    },
    Flush {
        ack: Option<oneshot::Sender<()>>,
    },
    Switch {
        conversation: Option<Uuid>,
        messages: Vec<Message>,
        ack: oneshot::Sender<()>,
    },
    EnsureConversation {
        reply: oneshot::Sender<Option<Uuid>>,
    },
}

/// Trigger surface for the sync engine. Cheap to clone; every method is a
/// message to the actor task that owns all sync state.
#[derive(Clone)]
pub struct SyncHandle {
    pub(crate) tx: mpsc::Sender<Command>,
    pub(crate) active: watch::Receiver<Option<Uuid>>,
    pub(crate) state: watch::Receiver<SyncState>,
}

impl SyncHandle {
    /// Replace the engine's view of the message list. Schedules a debounced
    /// sync if anything new needs persisting; edits inside the window
    /// collapse into one pass.
    pub async fn messages_changed(&self, messages: Vec<Message>) {
        let _ = self.tx.send(Command::MessagesChanged { messages }).await;
    }

    /// Forced sync: skips the debounce window and supersedes an in-flight
    /// pass. Does not wait for the outcome.
    pub async fn flush(&self) {
        let _ = self.tx.send(Command::Flush { ack: None }).await;
    }

    /// Forced sync that resolves once the pass has completed or proved a
    /// no-op. Failures also resolve; they are logged and left for the next
    /// trigger.
    pub async fn flush_wait(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush { ack: Some(ack) }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Conversation-switch protocol, in order: flush unsynced messages to
    /// the previous conversation, clear the synced-id set, adopt the new id
    /// (None for a fresh conversation), and reload the synced ids of an
    /// existing conversation before any further write.
    pub async fn switch_to(&self, conversation: Option<Uuid>, messages: Vec<Message>) {
        let (ack, done) = oneshot::channel();
        let command = Command::Switch {
            conversation,
            messages,
            ack,
        };
        if self.tx.send(command).await.is_ok() {
            let _ = done.await;
        }
    }

    /// The active conversation id, lazily creating a remote conversation
    /// for the signed-in user if none is active. `None` while signed out;
    /// creation failures are logged and also answer `None`.
    pub async fn ensure_conversation(&self) -> Option<Uuid> {
        let (reply, value) = oneshot::channel();
        let command = Command::EnsureConversation { reply };
        if self.tx.send(command).await.is_err() {
            return None;
        }
        value.await.unwrap_or(None)
    }

    /// Every lifecycle signal maps to a forced flush; closing and
    /// signing-out moments wait for it.
    pub async fn on_lifecycle_signal(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Hidden => self.flush().await,
            LifecycleSignal::Closing | LifecycleSignal::SigningOut => self.flush_wait().await,
        }
    }

    /// Read-only view of the active conversation id. Only the engine
    /// writes it.
    pub fn active_conversation(&self) -> Option<Uuid> {
        *self.active.borrow()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }
}
