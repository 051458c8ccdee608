use std::sync::Arc;

use berea_protocol::{ChatRequest, HistoryEntry, Message, Sender};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{AuthContext, SessionWatch};
use crate::completion::CompletionBackend;
use crate::config::{ChatSettings, SyncSettings};
use crate::storage::{DraftStore, LOCAL_USER_KEY};
use crate::sync::SyncHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a previous message is still awaiting its response")]
    Busy,
}

/// Where the session is in its one-turn-at-a-time cycle. The error path
/// folds back into `Idle`; a failed completion becomes a regular assistant
/// message, not a distinct state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

/// The chat orchestrator: owns the message list, appends the user's turn,
/// calls the completion backend, appends the reply, and drives the sync
/// engine on every list change.
///
/// One completion is in flight at a time; the user message is already
/// appended (and locally persisted) before the call starts, so a crashed
/// or failed turn never loses what the user typed.
pub struct ChatSession {
    messages: Vec<Message>,
    turn: TurnState,
    backend: Arc<dyn CompletionBackend>,
    drafts: Arc<DraftStore>,
    sync: SyncHandle,
    sessions: SessionWatch,
    settings: ChatSettings,
    history_window: usize,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        drafts: Arc<DraftStore>,
        sync: SyncHandle,
        sessions: SessionWatch,
        settings: ChatSettings,
        sync_settings: &SyncSettings,
    ) -> Self {
        let messages = vec![Message::boilerplate(&settings.welcome)];
        Self {
            messages,
            turn: TurnState::Idle,
            backend,
            drafts,
            sync,
            sessions,
            settings,
            history_window: sync_settings.history_window,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn
    }

    pub fn is_loading(&self) -> bool {
        self.turn == TurnState::AwaitingResponse
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        self.sync.active_conversation()
    }

    /// Send one user turn and return the assistant message that answers it.
    ///
    /// Rejects empty/whitespace input and overlapping sends without touching
    /// any state. The user message is appended optimistically; a completion
    /// failure appends the configured apology as an ordinary assistant
    /// message instead of surfacing an error.
    pub async fn send_message(&mut self, text: &str) -> Result<Message, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.turn != TurnState::Idle {
            return Err(ChatError::Busy);
        }

        // Context for the request is the history *before* this turn.
        let history: Vec<HistoryEntry> = self
            .messages
            .iter()
            .rev()
            .take(self.history_window)
            .rev()
            .map(HistoryEntry::from)
            .collect();
        // The token of the most recent real assistant turn. An apology
        // turn carries no token, so it deliberately resets the thread
        // rather than reviving a pre-failure one.
        let previous_response_id = self
            .messages
            .iter()
            .rev()
            .find(|msg| !msg.boilerplate && msg.sender == Sender::Assistant)
            .and_then(|msg| msg.continuation.clone());

        self.messages.push(Message::user(text));
        if let Err(e) = self.drafts.clear_draft(&self.user_key()) {
            warn!("failed to clear draft: {e}");
        }
        self.persist_snapshot();
        self.sync.messages_changed(self.messages.clone()).await;

        self.turn = TurnState::AwaitingResponse;
        let request = ChatRequest {
            user_input: text.to_string(),
            message_history: history,
            previous_response_id,
        };
        let reply = match self.backend.complete(request).await {
            Ok(response) => Message::assistant(response.response, Some(response.response_id)),
            Err(e) => {
                warn!("completion call failed: {e}");
                Message::assistant(&self.settings.apology, None)
            }
        };
        self.turn = TurnState::Idle;

        self.messages.push(reply.clone());
        self.persist_snapshot();
        self.sync.messages_changed(self.messages.clone()).await;
        Ok(reply)
    }

    /// Replace the active conversation with one loaded from history.
    ///
    /// The sync engine runs the switch protocol first (flush to the old
    /// conversation, clear the synced set, adopt the new id, preload its
    /// synced ids), so nothing loaded here is ever re-written.
    pub async fn load_conversation(
        &mut self,
        conversation: Uuid,
        messages: Vec<Message>,
    ) -> Result<(), ChatError> {
        if self.turn != TurnState::Idle {
            return Err(ChatError::Busy);
        }
        self.sync
            .switch_to(Some(conversation), messages.clone())
            .await;
        self.messages = messages;
        self.persist_snapshot();
        Ok(())
    }

    /// Start a fresh conversation: flush the old one, then reset to the
    /// welcome message. The remote conversation row is created lazily on
    /// the first real message.
    pub async fn new_conversation(&mut self) -> Result<(), ChatError> {
        if self.turn != TurnState::Idle {
            return Err(ChatError::Busy);
        }
        let messages = vec![Message::boilerplate(&self.settings.welcome)];
        self.sync.switch_to(None, messages.clone()).await;
        self.messages = messages;
        self.persist_snapshot();
        Ok(())
    }

    /// Rebuild the list and active conversation from the local snapshot.
    /// Missing or unreadable snapshots start a fresh session.
    pub async fn restore(&mut self) {
        let snapshot = match self.drafts.snapshot(&self.user_key()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("failed to read local snapshot: {e}");
                None
            }
        };
        if let Some((conversation, messages)) = snapshot {
            if !messages.is_empty() {
                self.sync.switch_to(conversation, messages.clone()).await;
                self.messages = messages;
                return;
            }
        }
        let _ = self.new_conversation().await;
    }

    /// Persist the text sitting unsent in the input box. Best-effort.
    pub fn set_draft(&self, text: &str) {
        if let Err(e) = self.drafts.set_draft(&self.user_key(), text) {
            warn!("failed to save draft: {e}");
        }
    }

    /// The stored draft, if any.
    pub fn draft(&self) -> Option<String> {
        match self.drafts.draft(&self.user_key()) {
            Ok(draft) => draft,
            Err(e) => {
                warn!("failed to read draft: {e}");
                None
            }
        }
    }

    /// Ordered sign-out: final flush, then the auth call, then the local
    /// wipe. The flush is awaited so sign-out never races away unsynced
    /// messages.
    pub async fn sign_out(&mut self, auth: &AuthContext) {
        let user_key = self.user_key();
        self.sync.flush_wait().await;
        auth.sign_out().await;
        if let Err(e) = self.drafts.clear_user(&user_key) {
            warn!("failed to clear local data on sign-out: {e}");
        }
        let _ = self.new_conversation().await;
    }

    fn persist_snapshot(&self) {
        let conversation = self.sync.active_conversation();
        if let Err(e) = self
            .drafts
            .save_snapshot(&self.user_key(), conversation, &self.messages)
        {
            warn!("failed to save local snapshot: {e}");
        }
    }

    fn user_key(&self) -> String {
        self.sessions
            .borrow()
            .as_ref()
            .map(|session| session.identity.user_id.to_string())
            .unwrap_or_else(|| LOCAL_USER_KEY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionError;
    use crate::config::BereaConfig;
    use crate::storage::MemoryStore;
    use crate::sync::{spawn_sync_engine, SyncConfig};
    use berea_protocol::{ChatResponse, Sender};
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use tokio::sync::watch;

    /// Completion stub that records every request and replies with a
    /// numbered response id. Calls listed in `fail_calls` (1-based) fail.
    struct StubBackend {
        requests: Mutex<Vec<ChatRequest>>,
        fail_all: bool,
        fail_calls: Vec<usize>,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                fail_all: false,
                fail_calls: Vec::new(),
            }
        }

        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::new()
            }
        }

        fn failing_call(call: usize) -> Self {
            Self {
                fail_calls: vec![call],
                ..Self::new()
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CompletionBackend for StubBackend {
        fn complete(
            &self,
            request: ChatRequest,
        ) -> BoxFuture<'_, Result<ChatResponse, CompletionError>> {
            Box::pin(async move {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                let call = requests.len();
                if self.fail_all || self.fail_calls.contains(&call) {
                    return Err(CompletionError::Api {
                        status: 502,
                        body: "upstream unavailable".into(),
                    });
                }
                Ok(ChatResponse {
                    response: "consider Acts 17:11".into(),
                    response_id: format!("resp_{call}"),
                })
            })
        }
    }

    fn make_session(backend: Arc<StubBackend>) -> (ChatSession, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (_sessions_tx, sessions) = watch::channel(None);
        let sync = spawn_sync_engine(store.clone(), sessions.clone(), SyncConfig::default());
        let config = BereaConfig::default();
        let session = ChatSession::new(
            backend,
            Arc::new(DraftStore::open_memory().unwrap()),
            sync,
            sessions,
            config.chat,
            &config.sync,
        );
        (session, store)
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let (mut session, _) = make_session(Arc::new(StubBackend::new()));
        assert_eq!(
            session.send_message("   ").await,
            Err(ChatError::EmptyMessage)
        );
        // Only the welcome message; nothing was appended.
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn send_appends_user_then_assistant() {
        let backend = Arc::new(StubBackend::new());
        let (mut session, _) = make_session(backend.clone());

        let reply = session.send_message("what does John 3:16 say?").await.unwrap();

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].content, "what does John 3:16 say?");
        assert_eq!(messages[2], reply);
        assert_eq!(reply.continuation.as_deref(), Some("resp_1"));
        assert_eq!(session.turn_state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn threads_continuation_token() {
        let backend = Arc::new(StubBackend::new());
        let (mut session, _) = make_session(backend.clone());

        session.send_message("first question").await.unwrap();
        session.send_message("second question").await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[0].previous_response_id, None);
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        // History for the second turn includes the welcome, the first
        // question, and its reply.
        assert_eq!(requests[1].message_history.len(), 3);
    }

    #[tokio::test]
    async fn failure_appends_apology_and_returns_idle() {
        let backend = Arc::new(StubBackend::failing());
        let (mut session, _) = make_session(backend);

        let reply = session.send_message("hello?").await.unwrap();

        assert_eq!(reply.sender, Sender::Assistant);
        assert_eq!(reply.content, BereaConfig::default().chat.apology);
        assert!(reply.continuation.is_none());
        assert!(!reply.boilerplate);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn apology_does_not_become_previous_response_id() {
        let backend = Arc::new(StubBackend::failing());
        let (mut session, _) = make_session(backend.clone());

        session.send_message("first").await.unwrap();
        session.send_message("second").await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[1].previous_response_id, None);
    }

    #[tokio::test]
    async fn apology_resets_the_token_from_an_earlier_success() {
        let backend = Arc::new(StubBackend::failing_call(2));
        let (mut session, _) = make_session(backend.clone());

        session.send_message("first").await.unwrap();
        session.send_message("second").await.unwrap();
        session.send_message("third").await.unwrap();

        let requests = backend.requests();
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        // The token-less apology is the most recent assistant turn, so the
        // thread does not resume from before the failure.
        assert_eq!(requests[2].previous_response_id, None);
    }

    #[tokio::test]
    async fn load_conversation_replaces_list_exactly() {
        let (mut session, _) = make_session(Arc::new(StubBackend::new()));
        let conversation = Uuid::new_v4();
        let loaded = vec![Message::user("m1"), Message::assistant("m2", None)];

        session
            .load_conversation(conversation, loaded.clone())
            .await
            .unwrap();

        assert_eq!(session.messages(), loaded.as_slice());
        assert_eq!(session.active_conversation(), Some(conversation));
    }

    #[tokio::test]
    async fn new_conversation_resets_to_welcome() {
        let (mut session, _) = make_session(Arc::new(StubBackend::new()));
        session.send_message("hello").await.unwrap();

        session.new_conversation().await.unwrap();

        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].boilerplate);
        assert_eq!(session.active_conversation(), None);
    }

    #[tokio::test]
    async fn history_window_is_bounded() {
        let backend = Arc::new(StubBackend::new());
        let (mut session, _) = make_session(backend.clone());

        for i in 0..15 {
            session.send_message(&format!("question {i}")).await.unwrap();
        }

        let requests = backend.requests();
        let last = requests.last().unwrap();
        // 1 welcome + 14 earlier turns * 2 messages = 29 prior entries,
        // clamped to the 20-message window.
        assert_eq!(last.message_history.len(), 20);
    }

    #[tokio::test]
    async fn draft_roundtrip_uses_local_key_when_signed_out() {
        let (session, _) = make_session(Arc::new(StubBackend::new()));
        session.set_draft("half-typed");
        assert_eq!(session.draft().as_deref(), Some("half-typed"));
    }
}
