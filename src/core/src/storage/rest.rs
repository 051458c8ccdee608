use futures::future::BoxFuture;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::auth::SessionWatch;

use super::types::{ConversationRecord, MessageRecord, UserRecord};
use super::{ConversationStore, StoreError};

/// PostgREST-dialect client for the hosted conversation store.
///
/// Every request carries the publishable `apikey` header plus a bearer
/// token: the signed-in user's access token when a session is live, the
/// publishable key otherwise. Row visibility is enforced server-side from
/// that token.
pub struct RestStore {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    sessions: SessionWatch,
}

#[derive(Deserialize)]
struct IdRow {
    id: Uuid,
}

impl RestStore {
    pub fn new(
        base: &str,
        api_key: impl Into<String>,
        sessions: SessionWatch,
    ) -> Result<Self, StoreError> {
        // Url::join replaces the last path segment unless the base ends
        // with a slash.
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
            sessions,
        })
    }

    fn table(&self, name: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(name)?)
    }

    fn bearer(&self) -> String {
        match self.sessions.borrow().as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.api_key.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(StoreError::Api {
        status: status.as_u16(),
        body,
    })
}

impl ConversationStore for RestStore {
    fn create_conversation(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<ConversationRecord, StoreError>> {
        Box::pin(async move {
            let url = self.table("conversations")?;
            let res = self
                .request(reqwest::Method::POST, url)
                .header("Prefer", "return=representation")
                .json(&serde_json::json!({ "user_id": user_id }))
                .send()
                .await?;
            let rows: Vec<ConversationRecord> = check(res).await?.json().await?;
            rows.into_iter().next().ok_or(StoreError::Api {
                status: 200,
                body: "insert returned no representation".into(),
            })
        })
    }

    fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<ConversationRecord>, StoreError>> {
        Box::pin(async move {
            let url = self.table("conversations")?;
            let res = self
                .request(reqwest::Method::GET, url)
                .query(&[
                    ("user_id", format!("eq.{user_id}")),
                    ("order", "created_at.desc".into()),
                ])
                .send()
                .await?;
            Ok(check(res).await?.json().await?)
        })
    }

    fn list_messages(
        &self,
        conversation_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<MessageRecord>, StoreError>> {
        Box::pin(async move {
            let url = self.table("conversation_messages")?;
            let res = self
                .request(reqwest::Method::GET, url)
                .query(&[
                    ("conversation_id", format!("eq.{conversation_id}")),
                    ("order", "created_at.asc".into()),
                ])
                .send()
                .await?;
            Ok(check(res).await?.json().await?)
        })
    }

    fn message_ids(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<Vec<Uuid>, StoreError>> {
        Box::pin(async move {
            let url = self.table("conversation_messages")?;
            let res = self
                .request(reqwest::Method::GET, url)
                .query(&[
                    ("conversation_id", format!("eq.{conversation_id}")),
                    ("select", "id".into()),
                ])
                .send()
                .await?;
            let rows: Vec<IdRow> = check(res).await?.json().await?;
            Ok(rows.into_iter().map(|row| row.id).collect())
        })
    }

    fn upsert_messages(&self, rows: Vec<MessageRecord>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            let url = self.table("conversation_messages")?;
            let res = self
                .request(reqwest::Method::POST, url)
                .header("Prefer", "resolution=merge-duplicates")
                .json(&rows)
                .send()
                .await?;
            check(res).await?;
            Ok(())
        })
    }

    fn delete_conversation(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let messages = self.table("conversation_messages")?;
            let res = self
                .request(reqwest::Method::DELETE, messages)
                .query(&[("conversation_id", format!("eq.{conversation_id}"))])
                .send()
                .await?;
            check(res).await?;

            let conversations = self.table("conversations")?;
            let res = self
                .request(reqwest::Method::DELETE, conversations)
                .query(&[("id", format!("eq.{conversation_id}"))])
                .send()
                .await?;
            check(res).await?;
            Ok(())
        })
    }

    fn find_user(
        &self,
        auth_user_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<UserRecord>, StoreError>> {
        Box::pin(async move {
            let url = self.table("users")?;
            let res = self
                .request(reqwest::Method::GET, url)
                .query(&[
                    ("auth_user_id", format!("eq.{auth_user_id}")),
                    ("select", "id,auth_user_id,email_address".into()),
                ])
                .send()
                .await?;
            let rows: Vec<UserRecord> = check(res).await?.json().await?;
            Ok(rows.into_iter().next())
        })
    }
}
