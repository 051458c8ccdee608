use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::storage::{ConversationStore, StoreError};

/// The signed-in user, resolved to the app-level `users` row.
///
/// `user_id` (not `auth_user_id`) is the ownership key for conversations
/// and message rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub auth_user_id: Uuid,
    pub email: String,
}

/// A live session: identity plus the bearer token store requests carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub identity: UserIdentity,
    pub access_token: String,
}

/// Receiver half of the session channel, handed to stores and the sync
/// engine so they always see the current identity.
pub type SessionWatch = watch::Receiver<Option<AuthSession>>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("not signed in")]
    NotSignedIn,

    #[error("signed in but no app user row is provisioned")]
    UserRowMissing,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("auth service rejected request ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Token grant returned by a successful password sign-in.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub auth_user_id: Uuid,
    pub access_token: String,
}

/// Object-safe auth service seam.
///
/// The live implementation speaks the GoTrue dialect; tests use stubs.
pub trait AuthApi: Send + Sync + 'static {
    /// Register a new account. The service mails a one-time code.
    fn sign_up(&self, email: &str, password: &str) -> BoxFuture<'_, Result<(), AuthError>>;

    /// Confirm a registration with the mailed one-time code.
    fn verify_signup(&self, email: &str, code: &str) -> BoxFuture<'_, Result<(), AuthError>>;

    /// Password sign-in.
    fn sign_in(&self, email: &str, password: &str) -> BoxFuture<'_, Result<TokenGrant, AuthError>>;

    /// Start a password recovery flow (mails a one-time code).
    fn request_password_reset(&self, email: &str) -> BoxFuture<'_, Result<(), AuthError>>;

    /// Finish a recovery flow: verify the code, then set the new password.
    fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> BoxFuture<'_, Result<(), AuthError>>;

    /// Invalidate the session server-side.
    fn sign_out(&self, access_token: &str) -> BoxFuture<'_, Result<(), AuthError>>;
}

// ── GoTrue-dialect implementation ────────────────────────────────────

/// Real auth client against a GoTrue-style `/auth/v1` service.
pub struct RestAuth {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

#[derive(Deserialize)]
struct GrantResponse {
    access_token: String,
    user: GrantUser,
}

#[derive(Deserialize)]
struct GrantUser {
    id: Uuid,
}

impl RestAuth {
    pub fn new(base: &str, api_key: impl Into<String>) -> Result<Self, AuthError> {
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        Ok(self.base.join(path)?)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.post(url).header("apikey", &self.api_key)
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(AuthError::Api {
        status: status.as_u16(),
        body,
    })
}

impl AuthApi for RestAuth {
    fn sign_up(&self, email: &str, password: &str) -> BoxFuture<'_, Result<(), AuthError>> {
        let body = serde_json::json!({ "email": email, "password": password });
        Box::pin(async move {
            let url = self.endpoint("signup")?;
            let res = self.post(url).json(&body).send().await?;
            check(res).await?;
            Ok(())
        })
    }

    fn verify_signup(&self, email: &str, code: &str) -> BoxFuture<'_, Result<(), AuthError>> {
        let body = serde_json::json!({ "type": "signup", "email": email, "token": code });
        Box::pin(async move {
            let url = self.endpoint("verify")?;
            let res = self.post(url).json(&body).send().await?;
            check(res).await?;
            Ok(())
        })
    }

    fn sign_in(&self, email: &str, password: &str) -> BoxFuture<'_, Result<TokenGrant, AuthError>> {
        let body = serde_json::json!({ "email": email, "password": password });
        Box::pin(async move {
            let mut url = self.endpoint("token")?;
            url.set_query(Some("grant_type=password"));
            let res = self.post(url).json(&body).send().await?;

            let status = res.status();
            if status == reqwest::StatusCode::BAD_REQUEST
                || status == reqwest::StatusCode::UNAUTHORIZED
            {
                return Err(AuthError::InvalidCredentials);
            }
            let grant: GrantResponse = check(res).await?.json().await?;
            Ok(TokenGrant {
                auth_user_id: grant.user.id,
                access_token: grant.access_token,
            })
        })
    }

    fn request_password_reset(&self, email: &str) -> BoxFuture<'_, Result<(), AuthError>> {
        let body = serde_json::json!({ "email": email });
        Box::pin(async move {
            let url = self.endpoint("recover")?;
            let res = self.post(url).json(&body).send().await?;
            check(res).await?;
            Ok(())
        })
    }

    fn confirm_password_reset(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> BoxFuture<'_, Result<(), AuthError>> {
        let verify_body = serde_json::json!({ "type": "recovery", "email": email, "token": code });
        let new_password = new_password.to_string();
        Box::pin(async move {
            // Recovery verification yields a short-lived session; the new
            // password is set through it.
            let url = self.endpoint("verify")?;
            let res = self.post(url).json(&verify_body).send().await?;
            let grant: GrantResponse = check(res).await?.json().await?;

            let url = self.endpoint("user")?;
            let res = self
                .http
                .put(url)
                .header("apikey", &self.api_key)
                .header("Authorization", format!("Bearer {}", grant.access_token))
                .json(&serde_json::json!({ "password": new_password }))
                .send()
                .await?;
            check(res).await?;
            Ok(())
        })
    }

    fn sign_out(&self, access_token: &str) -> BoxFuture<'_, Result<(), AuthError>> {
        let token = access_token.to_string();
        Box::pin(async move {
            let url = self.endpoint("logout")?;
            let res = self
                .post(url)
                .header("Authorization", format!("Bearer {token}"))
                .send()
                .await?;
            check(res).await?;
            Ok(())
        })
    }
}

// ── Session holder ───────────────────────────────────────────────────

/// Owns the auth seam and publishes the current session over a watch
/// channel. Everything downstream (stores, sync engine) reads identity
/// through [`SessionWatch`]; only this type writes it.
pub struct AuthContext {
    api: Arc<dyn AuthApi>,
    sessions: watch::Sender<Option<AuthSession>>,
}

impl AuthContext {
    pub fn new(api: Arc<dyn AuthApi>) -> Self {
        let (sessions, _) = watch::channel(None);
        Self { api, sessions }
    }

    pub fn subscribe(&self) -> SessionWatch {
        self.sessions.subscribe()
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.sessions.borrow().clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.sessions
            .borrow()
            .as_ref()
            .map(|s| s.identity.user_id)
    }

    pub fn api(&self) -> &Arc<dyn AuthApi> {
        &self.api
    }

    /// Password sign-in, then resolve the app-level user row that
    /// conversation ownership hangs off. Publishes the session on success.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        store: &dyn ConversationStore,
    ) -> Result<UserIdentity, AuthError> {
        let grant = self.api.sign_in(email, password).await?;
        let user = store
            .find_user(grant.auth_user_id)
            .await?
            .ok_or(AuthError::UserRowMissing)?;

        let identity = UserIdentity {
            user_id: user.id,
            auth_user_id: grant.auth_user_id,
            email: user.email_address,
        };
        self.sessions.send_replace(Some(AuthSession {
            identity: identity.clone(),
            access_token: grant.access_token,
        }));
        tracing::info!(user_id = %identity.user_id, "signed in");
        Ok(identity)
    }

    /// Clear the published session and invalidate it server-side.
    ///
    /// Callers that buffer unsynced data must flush before calling this;
    /// see `ChatSession::sign_out`. A failed logout call still clears the
    /// local session.
    pub async fn sign_out(&self) {
        let Some(session) = self.sessions.send_replace(None) else {
            return;
        };
        if let Err(e) = self.api.sign_out(&session.access_token).await {
            tracing::warn!(user_id = %session.identity.user_id, "logout call failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, UserRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub auth service granting a fixed identity.
    struct StubAuth {
        auth_user_id: Uuid,
        reject: bool,
        sign_outs: AtomicUsize,
    }

    impl StubAuth {
        fn granting(auth_user_id: Uuid) -> Self {
            Self {
                auth_user_id,
                reject: false,
                sign_outs: AtomicUsize::new(0),
            }
        }

        fn rejecting() -> Self {
            Self {
                auth_user_id: Uuid::nil(),
                reject: true,
                sign_outs: AtomicUsize::new(0),
            }
        }
    }

    impl AuthApi for StubAuth {
        fn sign_up(&self, _email: &str, _password: &str) -> BoxFuture<'_, Result<(), AuthError>> {
            Box::pin(async { Ok(()) })
        }

        fn verify_signup(&self, _email: &str, _code: &str) -> BoxFuture<'_, Result<(), AuthError>> {
            Box::pin(async { Ok(()) })
        }

        fn sign_in(
            &self,
            _email: &str,
            _password: &str,
        ) -> BoxFuture<'_, Result<TokenGrant, AuthError>> {
            let grant = TokenGrant {
                auth_user_id: self.auth_user_id,
                access_token: "token-1".into(),
            };
            let reject = self.reject;
            Box::pin(async move {
                if reject {
                    return Err(AuthError::InvalidCredentials);
                }
                Ok(grant)
            })
        }

        fn request_password_reset(&self, _email: &str) -> BoxFuture<'_, Result<(), AuthError>> {
            Box::pin(async { Ok(()) })
        }

        fn confirm_password_reset(
            &self,
            _email: &str,
            _code: &str,
            _new_password: &str,
        ) -> BoxFuture<'_, Result<(), AuthError>> {
            Box::pin(async { Ok(()) })
        }

        fn sign_out(&self, _access_token: &str) -> BoxFuture<'_, Result<(), AuthError>> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    async fn provisioned_store(auth_user_id: Uuid) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .add_user(UserRecord {
                id: user_id,
                auth_user_id,
                email_address: "lydia@berea.example".into(),
            })
            .await;
        (store, user_id)
    }

    #[tokio::test]
    async fn sign_in_publishes_session() {
        let auth_user_id = Uuid::new_v4();
        let (store, user_id) = provisioned_store(auth_user_id).await;
        let ctx = AuthContext::new(Arc::new(StubAuth::granting(auth_user_id)));
        let watch = ctx.subscribe();

        let identity = ctx
            .sign_in("lydia@berea.example", "pw", &store)
            .await
            .unwrap();

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.auth_user_id, auth_user_id);
        let session = watch.borrow().clone().unwrap();
        assert_eq!(session.access_token, "token-1");
        assert_eq!(ctx.user_id(), Some(user_id));
    }

    #[tokio::test]
    async fn sign_in_without_user_row_fails_closed() {
        let store = MemoryStore::new();
        let ctx = AuthContext::new(Arc::new(StubAuth::granting(Uuid::new_v4())));

        let err = ctx.sign_in("lydia@berea.example", "pw", &store).await;
        assert!(matches!(err, Err(AuthError::UserRowMissing)));
        assert!(ctx.current().is_none());
    }

    #[tokio::test]
    async fn bad_credentials_do_not_touch_session() {
        let store = MemoryStore::new();
        let ctx = AuthContext::new(Arc::new(StubAuth::rejecting()));

        let err = ctx.sign_in("lydia@berea.example", "wrong", &store).await;
        assert!(matches!(err, Err(AuthError::InvalidCredentials)));
        assert!(ctx.current().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_session_and_calls_service() {
        let auth_user_id = Uuid::new_v4();
        let (store, _) = provisioned_store(auth_user_id).await;
        let api = Arc::new(StubAuth::granting(auth_user_id));
        let ctx = AuthContext::new(api.clone());
        ctx.sign_in("lydia@berea.example", "pw", &store)
            .await
            .unwrap();

        ctx.sign_out().await;

        assert!(ctx.current().is_none());
        assert_eq!(api.sign_outs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_out_when_signed_out_is_a_no_op() {
        let api = Arc::new(StubAuth::granting(Uuid::new_v4()));
        let ctx = AuthContext::new(api.clone());

        ctx.sign_out().await;
        assert_eq!(api.sign_outs.load(Ordering::SeqCst), 0);
    }
}
