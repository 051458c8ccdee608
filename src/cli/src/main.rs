use std::env;
use std::sync::Arc;

use berea_core::storage::ConversationRecord;
use berea_core::{
    paths, AuthContext, BereaConfig, ChatError, ChatSession, HistoryLoader, HttpCompletion,
    LifecycleSignal, RestAuth, RestStore, SyncConfig,
};
use berea_protocol::Sender;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let config = match BereaConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("failed to load config, using defaults: {e}");
            BereaConfig::default()
        }
    };

    let drafts = Arc::new(berea_core::DraftStore::open(&paths::draft_db_path()?)?);
    let auth = AuthContext::new(Arc::new(RestAuth::new(
        &config.endpoints.auth_url,
        config.endpoints.api_key.clone(),
    )?));
    let sessions = auth.subscribe();
    let store = Arc::new(RestStore::new(
        &config.endpoints.store_url,
        config.endpoints.api_key.clone(),
        sessions.clone(),
    )?);
    let backend = Arc::new(HttpCompletion::new(
        &config.endpoints.chat_url,
        config.endpoints.api_key.clone(),
    )?);

    let sync = berea_core::spawn_sync_engine(
        store.clone(),
        sessions.clone(),
        SyncConfig {
            debounce: config.sync.debounce(),
        },
    );
    let history = HistoryLoader::new(store.clone(), sessions.clone());
    let mut session = ChatSession::new(
        backend,
        drafts,
        sync.clone(),
        sessions,
        config.chat,
        &config.sync,
    );
    session.restore().await;

    for msg in session.messages() {
        print_message(msg);
    }
    if let Some(draft) = session.draft() {
        println!("(unsent draft: {draft})");
    }
    println!("Type a message, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut listed: Vec<ConversationRecord> = Vec::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(e) = handle_line(&line, &mut session, &history, &auth, &store, &mut listed).await {
                    println!("{e}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // The closing flush is awaited so nothing typed this session is lost.
    sync.on_lifecycle_signal(LifecycleSignal::Closing).await;
    Ok(())
}

async fn handle_line(
    line: &str,
    session: &mut ChatSession,
    history: &HistoryLoader,
    auth: &AuthContext,
    store: &Arc<RestStore>,
    listed: &mut Vec<ConversationRecord>,
) -> Result<(), String> {
    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let argument = parts.next().unwrap_or_default().trim();
        return handle_command(command, argument, session, history, auth, store, listed).await;
    }

    match session.send_message(line).await {
        Ok(reply) => {
            print_message(&reply);
            Ok(())
        }
        Err(ChatError::EmptyMessage) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

async fn handle_command(
    command: &str,
    argument: &str,
    session: &mut ChatSession,
    history: &HistoryLoader,
    auth: &AuthContext,
    store: &Arc<RestStore>,
    listed: &mut Vec<ConversationRecord>,
) -> Result<(), String> {
    match command {
        "help" => {
            println!(
                "/new  /list  /open <n>  /delete <n>  /draft <text>\n\
                 /signin <email> <password>  /signout  /quit"
            );
            Ok(())
        }
        "new" => {
            session.new_conversation().await.map_err(|e| e.to_string())?;
            for msg in session.messages() {
                print_message(msg);
            }
            Ok(())
        }
        "list" => {
            *listed = history.list().await.map_err(|e| e.to_string())?;
            if listed.is_empty() {
                println!("no past conversations");
            }
            for (index, conversation) in listed.iter().enumerate() {
                println!(
                    "{}. {} ({})",
                    index + 1,
                    conversation.id,
                    conversation.created_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        "open" => {
            let conversation = pick(listed, argument)?;
            let messages = history.open(conversation).await.map_err(|e| e.to_string())?;
            session
                .load_conversation(conversation, messages)
                .await
                .map_err(|e| e.to_string())?;
            for msg in session.messages() {
                print_message(msg);
            }
            Ok(())
        }
        "delete" => {
            let conversation = pick(listed, argument)?;
            if session.active_conversation() == Some(conversation) {
                session.new_conversation().await.map_err(|e| e.to_string())?;
            }
            history.delete(conversation).await.map_err(|e| e.to_string())?;
            println!("deleted");
            Ok(())
        }
        "draft" => {
            session.set_draft(argument);
            println!("draft saved");
            Ok(())
        }
        "signin" => {
            let mut parts = argument.splitn(2, ' ');
            let (Some(email), Some(password)) = (parts.next(), parts.next()) else {
                return Err("usage: /signin <email> <password>".to_string());
            };
            let identity = auth
                .sign_in(email, password, store.as_ref())
                .await
                .map_err(|e| e.to_string())?;
            println!("signed in as {}", identity.email);
            session.restore().await;
            Ok(())
        }
        "signout" => {
            session.sign_out(auth).await;
            println!("signed out");
            Ok(())
        }
        other => Err(format!("unknown command: /{other}")),
    }
}

fn pick(listed: &[ConversationRecord], argument: &str) -> Result<Uuid, String> {
    let index: usize = argument
        .parse()
        .map_err(|_| "expected a conversation number from /list".to_string())?;
    listed
        .get(index.wrapping_sub(1))
        .map(|conversation| conversation.id)
        .ok_or_else(|| "no such conversation; run /list first".to_string())
}

fn print_message(msg: &berea_protocol::Message) {
    let label = match msg.sender {
        Sender::User => "you",
        Sender::Assistant => "berea",
    };
    println!("[{label}] {}", msg.content);
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("BEREA_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("BEREA_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
