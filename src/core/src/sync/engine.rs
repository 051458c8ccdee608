use std::collections::HashSet;
use std::sync::Arc;

use berea_protocol::Message;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::SessionWatch;
use crate::storage::{ConversationStore, MessageRecord, StoreError};

use super::{Command, SyncConfig, SyncHandle, SyncState};

const COMMAND_BUFFER: usize = 64;

/// Spawn the sync engine actor.
///
/// All mutable sync state (active conversation, synced-id set, debounce
/// deadline, in-flight pass) lives on the spawned task; the returned handle
/// is what every trigger site clones. The actor exits when the last handle
/// is dropped; an in-flight write at that point still runs to completion.
pub fn spawn_sync_engine(
    store: Arc<dyn ConversationStore>,
    sessions: SessionWatch,
    config: SyncConfig,
) -> SyncHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (results_tx, results_rx) = mpsc::channel(COMMAND_BUFFER);
    let (active_tx, active_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(SyncState::Idle);

    let engine = Engine {
        store,
        sessions,
        config,
        results: results_tx,
        active: active_tx,
        state: state_tx,
        conversation: None,
        synced: HashSet::new(),
        messages: Vec::new(),
        deadline: None,
        generation: 0,
        in_flight: None,
        waiters: Vec::new(),
    };
    tokio::spawn(engine.run(rx, results_rx));

    SyncHandle {
        tx,
        active: active_rx,
        state: state_rx,
    }
}

/// Outcome of one spawned write pass, looped back into the actor so that
/// only the actor task ever touches the synced set.
struct WriteOutcome {
    generation: u64,
    conversation: Uuid,
    ids: Vec<Uuid>,
    result: Result<(), StoreError>,
}

struct Engine {
    store: Arc<dyn ConversationStore>,
    sessions: SessionWatch,
    config: SyncConfig,
    results: mpsc::Sender<WriteOutcome>,
    active: watch::Sender<Option<Uuid>>,
    state: watch::Sender<SyncState>,
    conversation: Option<Uuid>,
    synced: HashSet<Uuid>,
    messages: Vec<Message>,
    deadline: Option<Instant>,
    generation: u64,
    in_flight: Option<(u64, JoinHandle<()>)>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Engine {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut results: mpsc::Receiver<WriteOutcome>,
    ) {
        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle(command).await,
                        None => break,
                    }
                }
                Some(outcome) = results.recv() => self.finish_sync(outcome),
                _ = debounce_elapsed(self.deadline) => {
                    self.deadline = None;
                    self.start_sync(false).await;
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::MessagesChanged { messages } => {
                self.messages = messages;
                if self.has_unsynced() {
                    self.deadline = Some(Instant::now() + self.config.debounce);
                }
            }
            Command::Flush { ack } => {
                self.deadline = None;
                if let Some(ack) = ack {
                    self.waiters.push(ack);
                }
                self.start_sync(true).await;
            }
            Command::Switch {
                conversation,
                messages,
                ack,
            } => {
                self.switch_to(conversation, messages).await;
                let _ = ack.send(());
            }
            Command::EnsureConversation { reply } => {
                let id = self.ensure_conversation().await;
                let _ = reply.send(id);
            }
        }
    }

    /// One sync pass. Non-forced passes yield to an in-flight one; forced
    /// passes abort and supersede it. An empty unsynced set is a no-op and
    /// never creates a conversation.
    async fn start_sync(&mut self, force: bool) {
        if let Some((generation, handle)) = self.in_flight.take() {
            if !force {
                debug!("sync already in flight; trigger dropped");
                self.in_flight = Some((generation, handle));
                return;
            }
            handle.abort();
            debug!("forced sync superseded the in-flight pass");
        }

        let unsynced = self.unsynced_messages();
        if unsynced.is_empty() {
            self.settle();
            return;
        }

        let Some(user_id) = self.current_user() else {
            info!("not signed in; keeping messages local");
            self.settle();
            return;
        };

        let Some(conversation_id) = self.conversation_for_write(user_id).await else {
            self.settle();
            return;
        };

        let rows: Vec<MessageRecord> = unsynced
            .iter()
            .map(|msg| MessageRecord::from_message(user_id, conversation_id, msg))
            .collect();
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

        self.generation += 1;
        let generation = self.generation;
        let store = self.store.clone();
        let results = self.results.clone();
        let handle = tokio::spawn(async move {
            let result = store.upsert_messages(rows).await;
            let _ = results
                .send(WriteOutcome {
                    generation,
                    conversation: conversation_id,
                    ids,
                    result,
                })
                .await;
        });
        self.in_flight = Some((generation, handle));
        self.state.send_replace(SyncState::Syncing);
    }

    fn finish_sync(&mut self, outcome: WriteOutcome) {
        // A write that finished for a conversation we have switched away
        // from must not leak into the current synced set.
        match &outcome.result {
            Ok(()) => {
                if self.conversation == Some(outcome.conversation) {
                    self.synced.extend(outcome.ids.iter().copied());
                }
                debug!(
                    conversation_id = %outcome.conversation,
                    count = outcome.ids.len(),
                    "sync pass completed"
                );
            }
            Err(e) => {
                warn!(conversation_id = %outcome.conversation, "failed to sync messages: {e}");
            }
        }

        // Outcomes from a superseded pass may still arrive; the synced-set
        // update above is all they are good for.
        let current = self.in_flight.as_ref().map(|(generation, _)| *generation);
        if current == Some(outcome.generation) {
            self.in_flight = None;
            self.settle();
        }
    }

    /// Conversation-switch protocol: flush to the old id, clear the set,
    /// adopt the new id, preload its synced ids.
    ///
    /// The flush runs inline on the actor, not as a spawned pass: the ack
    /// is only sent once the old conversation's rows are on the store, so
    /// a forced flush arriving right after the switch has nothing left to
    /// abort.
    async fn switch_to(&mut self, conversation: Option<Uuid>, messages: Vec<Message>) {
        self.deadline = None;
        self.flush_inline().await;

        self.synced.clear();
        self.adopt(conversation);
        self.messages = messages;

        if let Some(id) = conversation {
            // Must complete before any write to the adopted conversation;
            // commands queue behind this await, which is exactly the order
            // we need.
            match self.store.message_ids(id).await {
                Ok(ids) => {
                    self.synced = ids.into_iter().collect();
                    debug!(conversation_id = %id, count = self.synced.len(), "loaded synced ids");
                }
                Err(e) => {
                    // Upserts are idempotent, so the worst case of an empty
                    // set is re-writing rows the store already has.
                    warn!(conversation_id = %id, "failed to load synced ids: {e}");
                }
            }
        }
    }

    /// Forced pass awaited on the actor itself. Supersedes any spawned
    /// pass; commands sent during the write queue behind it, which keeps
    /// the switch ordering intact.
    async fn flush_inline(&mut self) {
        if let Some((_, handle)) = self.in_flight.take() {
            handle.abort();
            debug!("inline flush superseded the in-flight pass");
        }

        let unsynced = self.unsynced_messages();
        if unsynced.is_empty() {
            self.settle();
            return;
        }

        let Some(user_id) = self.current_user() else {
            info!("not signed in; keeping messages local");
            self.settle();
            return;
        };

        let Some(conversation_id) = self.conversation_for_write(user_id).await else {
            self.settle();
            return;
        };

        let rows: Vec<MessageRecord> = unsynced
            .iter()
            .map(|msg| MessageRecord::from_message(user_id, conversation_id, msg))
            .collect();
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

        self.state.send_replace(SyncState::Syncing);
        match self.store.upsert_messages(rows).await {
            Ok(()) => {
                self.synced.extend(ids);
                debug!(%conversation_id, "inline flush completed");
            }
            Err(e) => {
                warn!(%conversation_id, "failed to sync messages: {e}");
            }
        }
        self.settle();
    }

    async fn ensure_conversation(&mut self) -> Option<Uuid> {
        if let Some(id) = self.conversation {
            return Some(id);
        }
        let Some(user_id) = self.current_user() else {
            info!("not signed in; no conversation to ensure");
            return None;
        };
        self.conversation_for_write(user_id).await
    }

    /// The active conversation id, creating one lazily on first use.
    /// A conversation created here is brand new, so there are no synced
    /// ids to preload.
    async fn conversation_for_write(&mut self, user_id: Uuid) -> Option<Uuid> {
        if let Some(id) = self.conversation {
            return Some(id);
        }
        match self.store.create_conversation(user_id).await {
            Ok(record) => {
                info!(conversation_id = %record.id, "created conversation on first message");
                self.adopt(Some(record.id));
                Some(record.id)
            }
            Err(e) => {
                warn!("failed to create conversation: {e}");
                None
            }
        }
    }

    fn adopt(&mut self, conversation: Option<Uuid>) {
        self.conversation = conversation;
        self.active.send_replace(conversation);
    }

    /// No pass running: report idle and release flush waiters.
    fn settle(&mut self) {
        self.state.send_replace(SyncState::Idle);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn unsynced_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|msg| !msg.boilerplate && !self.synced.contains(&msg.id))
            .cloned()
            .collect()
    }

    fn has_unsynced(&self) -> bool {
        self.messages
            .iter()
            .any(|msg| !msg.boilerplate && !self.synced.contains(&msg.id))
    }

    fn current_user(&self) -> Option<Uuid> {
        self.sessions
            .borrow()
            .as_ref()
            .map(|session| session.identity.user_id)
    }
}

async fn debounce_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
