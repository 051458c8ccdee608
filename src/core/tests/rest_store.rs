use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use berea_core::auth::{AuthSession, SessionWatch, UserIdentity};
use berea_core::storage::{ConversationStore, RestStore};
use berea_core::StoreError;
use berea_protocol::Message;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

// ── A tiny PostgREST stand-in ────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    headers: Vec<(String, HashMap<String, String>)>,
    bodies: Vec<Value>,
    queries: Vec<HashMap<String, String>>,
}

#[derive(Clone)]
struct StubState {
    recorded: Arc<Mutex<Recorded>>,
    user_row: Option<Value>,
    reject: bool,
}

fn capture(state: &StubState, name: &str, headers: &HeaderMap, query: HashMap<String, String>) {
    let mut recorded = state.recorded.lock().unwrap();
    let flat = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    recorded.headers.push((name.to_string(), flat));
    recorded.queries.push(query);
}

async fn conversations(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    capture(&state, "conversations", &headers, HashMap::new());
    if state.reject {
        return (StatusCode::FORBIDDEN, Json(json!({"message": "denied"})));
    }
    let row = json!([{
        "id": Uuid::new_v4(),
        "user_id": body["user_id"],
        "created_at": Utc::now(),
    }]);
    state.recorded.lock().unwrap().bodies.push(body);
    (StatusCode::CREATED, Json(row))
}

async fn messages_get(
    State(state): State<StubState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    capture(&state, "messages_get", &headers, query);
    Json(json!([{ "id": Uuid::new_v4() }, { "id": Uuid::new_v4() }]))
}

async fn messages_post(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    capture(&state, "messages_post", &headers, HashMap::new());
    state.recorded.lock().unwrap().bodies.push(body);
    StatusCode::CREATED
}

async fn users(
    State(state): State<StubState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    capture(&state, "users", &headers, query);
    match &state.user_row {
        Some(row) => Json(json!([row])),
        None => Json(json!([])),
    }
}

async fn start_stub(state: StubState) -> SocketAddr {
    let app = Router::new()
        .route("/conversations", post(conversations))
        .route("/conversation_messages", get(messages_get).post(messages_post))
        .route("/users", get(users))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn signed_in_watch(user_id: Uuid) -> (watch::Sender<Option<AuthSession>>, SessionWatch) {
    watch::channel(Some(AuthSession {
        identity: UserIdentity {
            user_id,
            auth_user_id: Uuid::new_v4(),
            email: "berean@example.com".into(),
        },
        access_token: "user-token".into(),
    }))
}

fn header_of(recorded: &Arc<Mutex<Recorded>>, endpoint: &str, name: &str) -> Option<String> {
    let recorded = recorded.lock().unwrap();
    recorded
        .headers
        .iter()
        .find(|(seen, _)| seen == endpoint)
        .and_then(|(_, headers)| headers.get(name).cloned())
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_conversation_sends_session_bearer() {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let addr = start_stub(StubState {
        recorded: recorded.clone(),
        user_row: None,
        reject: false,
    })
    .await;

    let user_id = Uuid::new_v4();
    let (_tx, sessions) = signed_in_watch(user_id);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();

    let record = store.create_conversation(user_id).await.unwrap();
    assert_eq!(record.user_id, user_id);

    assert_eq!(
        header_of(&recorded, "conversations", "apikey").as_deref(),
        Some("anon-key")
    );
    assert_eq!(
        header_of(&recorded, "conversations", "authorization").as_deref(),
        Some("Bearer user-token")
    );
    assert_eq!(
        header_of(&recorded, "conversations", "prefer").as_deref(),
        Some("return=representation")
    );
}

#[tokio::test]
async fn signed_out_requests_fall_back_to_the_anon_key() {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let addr = start_stub(StubState {
        recorded: recorded.clone(),
        user_row: None,
        reject: false,
    })
    .await;

    let (_tx, sessions) = watch::channel(None);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();
    store.message_ids(Uuid::new_v4()).await.unwrap();

    assert_eq!(
        header_of(&recorded, "messages_get", "authorization").as_deref(),
        Some("Bearer anon-key")
    );
}

#[tokio::test]
async fn upsert_uses_merge_duplicates_and_role_labels() {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let addr = start_stub(StubState {
        recorded: recorded.clone(),
        user_row: None,
        reject: false,
    })
    .await;

    let user_id = Uuid::new_v4();
    let (_tx, sessions) = signed_in_watch(user_id);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();

    let conversation_id = Uuid::new_v4();
    let message = Message::assistant("grace and peace", Some("resp_1".into()));
    store
        .upsert_messages(vec![
            berea_core::storage::MessageRecord::from_message(user_id, conversation_id, &message),
        ])
        .await
        .unwrap();

    assert_eq!(
        header_of(&recorded, "messages_post", "prefer").as_deref(),
        Some("resolution=merge-duplicates")
    );
    let recorded = recorded.lock().unwrap();
    let rows = recorded.bodies.last().unwrap();
    assert_eq!(rows[0]["role"], "ai");
    assert_eq!(rows[0]["id"], json!(message.id));
}

#[tokio::test]
async fn empty_upsert_skips_the_network() {
    // No server at all; an empty batch must not touch it.
    let (_tx, sessions) = watch::channel(None);
    let store = RestStore::new("http://127.0.0.1:1", "anon-key", sessions).unwrap();
    store.upsert_messages(Vec::new()).await.unwrap();
}

#[tokio::test]
async fn message_ids_selects_only_ids() {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let addr = start_stub(StubState {
        recorded: recorded.clone(),
        user_row: None,
        reject: false,
    })
    .await;

    let (_tx, sessions) = watch::channel(None);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();

    let conversation_id = Uuid::new_v4();
    let ids = store.message_ids(conversation_id).await.unwrap();
    assert_eq!(ids.len(), 2);

    let recorded = recorded.lock().unwrap();
    let query = recorded.queries.last().unwrap();
    assert_eq!(query.get("select").map(String::as_str), Some("id"));
    assert_eq!(
        query.get("conversation_id").cloned(),
        Some(format!("eq.{conversation_id}"))
    );
}

#[tokio::test]
async fn find_user_resolves_the_app_row() {
    let auth_user_id = Uuid::new_v4();
    let row = json!({
        "id": Uuid::new_v4(),
        "auth_user_id": auth_user_id,
        "email_address": "berean@example.com",
    });
    let addr = start_stub(StubState {
        recorded: Arc::new(Mutex::new(Recorded::default())),
        user_row: Some(row),
        reject: false,
    })
    .await;

    let (_tx, sessions) = watch::channel(None);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();

    let user = store.find_user(auth_user_id).await.unwrap().unwrap();
    assert_eq!(user.auth_user_id, auth_user_id);

    let missing = start_stub(StubState {
        recorded: Arc::new(Mutex::new(Recorded::default())),
        user_row: None,
        reject: false,
    })
    .await;
    let (_tx2, sessions) = watch::channel(None);
    let store = RestStore::new(&format!("http://{missing}"), "anon-key", sessions).unwrap();
    assert!(store.find_user(auth_user_id).await.unwrap().is_none());
}

#[tokio::test]
async fn rejection_surfaces_status_and_body() {
    let addr = start_stub(StubState {
        recorded: Arc::new(Mutex::new(Recorded::default())),
        user_row: None,
        reject: true,
    })
    .await;

    let (_tx, sessions) = watch::channel(None);
    let store = RestStore::new(&format!("http://{addr}"), "anon-key", sessions).unwrap();

    match store.create_conversation(Uuid::new_v4()).await {
        Err(StoreError::Api { status, body }) => {
            assert_eq!(status, 403);
            assert!(body.contains("denied"));
        }
        other => panic!("expected an api error, got {other:?}"),
    }
}
