use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use berea_protocol::{ChatRequest, ChatResponse};

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("completion endpoint rejected request ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Object-safe seam over the hosted completion endpoint.
///
/// One request/response per turn; streaming is deliberately not part of
/// this surface.
pub trait CompletionBackend: Send + Sync + 'static {
    fn complete(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<ChatResponse, CompletionError>>;
}

/// Live client for the hosted endpoint: one JSON `POST` per turn.
pub struct HttpCompletion {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpCompletion {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> Result<Self, CompletionError> {
        let endpoint = Url::parse(endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

impl CompletionBackend for HttpCompletion {
    fn complete(
        &self,
        request: ChatRequest,
    ) -> BoxFuture<'_, Result<ChatResponse, CompletionError>> {
        Box::pin(async move {
            let mut req = self.http.post(self.endpoint.clone()).json(&request);
            if !self.api_key.is_empty() {
                req = req.header("apikey", &self.api_key);
            }
            let res = req.send().await?;

            let status = res.status();
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(CompletionError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(res.json().await?)
        })
    }
}
